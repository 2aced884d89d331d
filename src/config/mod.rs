//! Configuration module for screencap
//!
//! Handles loading and managing application settings from TOML files.

mod repository;
mod settings;

pub use repository::{SettingsRepository, TomlSettingsRepository};
pub use settings::{
    CaptureSettings, GeneralSettings, RecordingFileFormat, RecordingQuality, RecordingSettings,
    Settings,
};
