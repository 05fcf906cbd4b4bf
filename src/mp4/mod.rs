//! The external MP4 source oracle and the in-scope codec config extractor
//! (spec §1, §4.4, §9).

pub mod boxes;
pub mod codec_config;
pub mod oracle;

pub use oracle::{MP4Analysis, MediaSource, Mp4File, SampleInfo, TrackInfo, TrackKind};
