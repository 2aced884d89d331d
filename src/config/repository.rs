//! Persistence of recording settings

use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use super::settings::{RecordingSettings, Settings};
use crate::{Result, ScreencapError};

/// Loads and saves the engine's recording settings
pub trait SettingsRepository: Send + Sync {
    fn load(&self) -> RecordingSettings;

    fn save(&self, settings: &RecordingSettings) -> Result<()>;
}

/// Keeps recording settings in the `[recording]` section of `config.toml`
pub struct TomlSettingsRepository {
    path: PathBuf,
}

impl TomlSettingsRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_settings(&self) -> Option<Settings> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match toml::from_str(&content) {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!("Ignoring unreadable config {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl SettingsRepository for TomlSettingsRepository {
    fn load(&self) -> RecordingSettings {
        self.read_settings()
            .map(|settings| settings.recording)
            .unwrap_or_default()
    }

    fn save(&self, recording: &RecordingSettings) -> Result<()> {
        let mut settings = self.read_settings().unwrap_or_default();
        settings.recording = recording.clone();

        let content = toml::to_string_pretty(&settings)
            .map_err(|e| ScreencapError::FileWriteFailed(e.to_string()))?;

        let dir = self
            .path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(content.as_bytes())?;
        file.persist(&self.path)
            .map_err(|e| ScreencapError::FileWriteFailed(e.error.to_string()))?;
        Ok(())
    }
}
