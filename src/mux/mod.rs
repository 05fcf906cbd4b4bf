//! Fragmented-MP4 and MPEG-TS segment writers (spec §4.2, §4.3).

pub mod boxwriter;
pub mod fmp4;
pub mod ts;

pub use fmp4::{FmP4Writer, SegmentByteRange, TrackFragment, TrackMeta};
pub use ts::{TsSampleUnit, TsWriter};
