//! Low-Latency HLS orchestrator — spec §4.6.

pub mod blocking;
pub mod delta;
pub mod event;
pub mod manager;
pub mod partial;

pub use blocking::{BlockingPlaylistHandler, PlaylistRequest};
pub use delta::DeltaUpdateGenerator;
pub use event::LLHLSEvent;
pub use manager::LLHLSManager;
pub use partial::{PartialSegmentManager, PreloadHintUri};
