//! screencap - Screen, window and application recording with pause/resume
//!
//! A recording session is split into segments (one file per continuous span)
//! that are stitched back into a single deliverable when the session stops.

pub mod capture;
pub mod cli;
pub mod config;
pub mod engine;
pub mod services;
pub mod session;
pub mod storage;

use std::fmt;

use thiserror::Error;

/// Permission a recording can require
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ScreenRecording,
    Camera,
    Microphone,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ScreenRecording => f.write_str("Screen recording"),
            Permission::Camera => f.write_str("Camera"),
            Permission::Microphone => f.write_str("Microphone"),
        }
    }
}

/// Main error type for screencap
///
/// Cloneable because a single failure can resolve several pending waiters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScreencapError {
    #[error("{0} permission was denied")]
    PermissionDenied(Permission),

    #[error("Screen capture failed to start: {0}")]
    CaptureFailed(String),

    #[error("Operation is not currently possible (phase: {0})")]
    NotPossible(String),

    #[error("Recording output failed: {0}")]
    SinkFailed(String),

    #[error("Capture stream stopped: {0}")]
    StreamFailed(String),

    #[error("Capture connection was interrupted")]
    ConnectionInterrupted,

    #[error("Unable to write the recording file: {0}")]
    FileWriteFailed(String),

    #[error("Invalid save location: {0}")]
    InvalidSaveLocation(String),
}

impl From<std::io::Error> for ScreencapError {
    fn from(err: std::io::Error) -> Self {
        ScreencapError::FileWriteFailed(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScreencapError>;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "screencap";
