//! Data models for storage

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::capture::CaptureSource;

/// A finished (or salvaged) recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Unique identifier (UUID)
    pub id: String,

    /// Path to the media file
    pub path: PathBuf,

    /// When capture started
    pub created_at: DateTime<Utc>,

    /// Recorded time in seconds, paused spans excluded
    pub duration_secs: f64,

    /// What was captured
    pub capture_type: CaptureSource,
}

impl Recording {
    /// Create a new recording record with a fresh id
    pub fn new(
        path: PathBuf,
        created_at: DateTime<Utc>,
        duration_secs: f64,
        capture_type: CaptureSource,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            created_at,
            duration_secs,
            capture_type,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}
