//! Recording session: phase machine, segment lifecycle and stitching

mod controller;
mod phase;
pub mod stitcher;

pub use controller::{segment_path, ErrorHandler, OutputFormat, SessionController, SessionHandlers};
pub use phase::{Phase, RecordingOptions, Segment, Waiter, WaiterKind};
pub use stitcher::{FfmpegConcatMerger, SegmentMerger, SegmentStitcher};
