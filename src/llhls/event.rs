//! LL-HLS event stream — spec §4.6.2.

use crate::types::{LLPartialSegment, LiveSegment, PreloadHint};

/// Emitted by [`super::manager::LLHLSManager`] as the live playlist evolves.
/// Consumers (push engine, metrics) subscribe via an `mpsc` receiver.
#[derive(Debug, Clone)]
pub enum LLHLSEvent {
    PartialAdded(LLPartialSegment),
    SegmentCompleted(LiveSegment),
    PreloadHintUpdated(PreloadHint),
    StreamEnded,
}
