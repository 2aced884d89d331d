//! Session phase and the single-slot transition waiter

use std::fmt;
use std::path::PathBuf;

use tokio::sync::oneshot;

use crate::capture::{OutputFileType, VideoCodec};
use crate::Result;

/// Lifecycle stage of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No session, or the last one was torn down
    #[default]
    Idle,
    /// A segment is open and being written
    Recording,
    /// Waiting for the open segment to finalize before pausing
    Pausing,
    /// Stream running, no segment open
    Paused,
    /// Opening the next segment
    Resuming,
    /// Finalizing and stitching
    Stopping,
    /// Finalizing and deleting
    Discarding,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Stopping => "stopping",
            Self::Discarding => "discarding",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finalized (or currently open) segment file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u32,
    pub path: PathBuf,
}

/// Caller preferences for the recording container and codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingOptions {
    pub preferred_file_type: Option<OutputFileType>,
    pub preferred_codec: Option<VideoCodec>,
}

/// Which transition is waiting for the sink to detach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterKind {
    Pause,
    Stop,
    Discard,
}

/// The one outstanding detach rendezvous of a session
#[derive(Debug)]
pub struct Waiter {
    pub kind: WaiterKind,
    pub tx: oneshot::Sender<Result<()>>,
}

impl Waiter {
    pub fn new(kind: WaiterKind) -> (Self, oneshot::Receiver<Result<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self { kind, tx }, rx)
    }

    /// Resolve the waiting caller; a caller that gave up is ignored
    pub fn resolve(self, result: Result<()>) {
        let _ = self.tx.send(result);
    }
}
