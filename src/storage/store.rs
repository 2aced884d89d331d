//! Recent recordings list

use std::io::Write;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::models::Recording;
use crate::{Result, ScreencapError};

/// How many recordings the recents list keeps
pub const MAX_RECENT_RECORDINGS: usize = 20;

/// Put `recording` first and drop the oldest entries beyond the cap
pub fn add_recording(mut recordings: Vec<Recording>, recording: Recording) -> Vec<Recording> {
    recordings.insert(0, recording);
    recordings.truncate(MAX_RECENT_RECORDINGS);
    recordings
}

/// Persistence for the recents list, newest first
pub trait RecordingStore: Send + Sync {
    /// Load the list; a missing or unreadable store is empty
    fn load(&self) -> Vec<Recording>;

    fn save(&self, recordings: &[Recording]) -> Result<()>;

    /// Add a recording and persist the updated list
    fn add(&self, recording: Recording) -> Result<Vec<Recording>> {
        let updated = add_recording(self.load(), recording);
        self.save(&updated)?;
        Ok(updated)
    }
}

/// Recents list kept as one JSON document
pub struct JsonRecordingStore {
    path: PathBuf,
}

impl JsonRecordingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordingStore for JsonRecordingStore {
    fn load(&self) -> Vec<Recording> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!("No recents at {}: {}", self.path.display(), e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(recordings) => recordings,
            Err(e) => {
                warn!("Ignoring corrupt recents file {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    fn save(&self, recordings: &[Recording]) -> Result<()> {
        let dir = self
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let content = serde_json::to_vec_pretty(recordings)
            .map_err(|e| ScreencapError::FileWriteFailed(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(&content)?;
        file.persist(&self.path)
            .map_err(|e| ScreencapError::FileWriteFailed(e.error.to_string()))?;
        Ok(())
    }
}
