//! Application settings management

use anyhow::{Context, Result};
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::capture::{OutputFileType, VideoCodec};

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Recording behaviour, shared with the engine
    #[serde(default)]
    pub recording: RecordingSettings,

    /// ffmpeg capture backend settings
    #[serde(default)]
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Data directory for the recents list
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where finished recordings are written
    #[serde(default = "default_recordings_dir")]
    pub recordings_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Container written for finished recordings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFileFormat {
    #[default]
    Mp4,
    Mov,
}

impl RecordingFileFormat {
    pub fn file_type(&self) -> OutputFileType {
        match self {
            Self::Mp4 => OutputFileType::Mp4,
            Self::Mov => OutputFileType::Mov,
        }
    }
}

impl std::str::FromStr for RecordingFileFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "mov" => Ok(Self::Mov),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Encoding quality; high selects HEVC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    #[default]
    Standard,
    High,
}

impl RecordingQuality {
    pub fn video_codec(&self) -> VideoCodec {
        match self {
            Self::Standard => VideoCodec::H264,
            Self::High => VideoCodec::Hevc,
        }
    }
}

impl std::str::FromStr for RecordingQuality {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "high" => Ok(Self::High),
            other => Err(format!("unknown quality: {}", other)),
        }
    }
}

/// Recording settings. Replaced wholesale, never mutated in place by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Seconds to count down before capture starts (0 = none)
    #[serde(default = "default_countdown")]
    pub countdown_seconds: u32,

    /// Request camera access before recording
    #[serde(default = "default_true")]
    pub camera_enabled: bool,

    /// Record the microphone
    #[serde(default = "default_true")]
    pub microphone_enabled: bool,

    /// Record system audio
    #[serde(default)]
    pub system_audio_enabled: bool,

    #[serde(default)]
    pub output_format: RecordingFileFormat,

    #[serde(default)]
    pub quality: RecordingQuality,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// ffmpeg binary (looked up in PATH when relative)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// X11 display or avfoundation screen device (empty = $DISPLAY)
    #[serde(default)]
    pub display: String,

    /// Capture framerate
    #[serde(default = "default_framerate")]
    pub framerate: u32,

    /// PulseAudio source for the microphone
    #[serde(default = "default_microphone_source")]
    pub microphone_source: String,

    /// PulseAudio source for system audio
    #[serde(default = "default_system_audio_source")]
    pub system_audio_source: String,
}

// Default value functions

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "screencap", "screencap")
}

fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share/screencap"))
}

fn default_recordings_dir() -> PathBuf {
    UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(|dir| dir.join("Screencap")))
        .unwrap_or_else(|| default_data_dir().join("recordings"))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_countdown() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_framerate() -> u32 {
    30
}

fn default_microphone_source() -> String {
    "default".to_string()
}

fn default_system_audio_source() -> String {
    "@DEFAULT_MONITOR@".to_string()
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            recordings_dir: default_recordings_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            countdown_seconds: default_countdown(),
            camera_enabled: true,
            microphone_enabled: true,
            system_audio_enabled: false,
            output_format: RecordingFileFormat::default(),
            quality: RecordingQuality::default(),
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            display: String::new(),
            framerate: default_framerate(),
            microphone_source: default_microphone_source(),
            system_audio_source: default_system_audio_source(),
        }
    }
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load settings from a specific file, falling back to defaults if absent
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            tracing::info!("No config file found, using defaults");
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SCREENCAP_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.general.recordings_dir = PathBuf::from(dir);
            }
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = project_dirs().context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write default configuration to a file
    pub fn write_default(path: &Path) -> Result<()> {
        let settings = Self::default();
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the recents list path
    pub fn recordings_store_path(&self) -> PathBuf {
        self.general.data_dir.join("recordings.json")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.general.data_dir)?;
        std::fs::create_dir_all(&self.general.recordings_dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.recording.countdown_seconds, 3);
        assert!(settings.recording.camera_enabled);
        assert!(settings.recording.microphone_enabled);
        assert!(!settings.recording.system_audio_enabled);
        assert_eq!(settings.recording.output_format, RecordingFileFormat::Mp4);
        assert_eq!(settings.recording.quality.video_codec(), VideoCodec::H264);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [recording]
            countdown_seconds = 0
            quality = "high"

            [capture]
            framerate = 60
            "#,
        )
        .unwrap();

        assert_eq!(settings.recording.countdown_seconds, 0);
        assert_eq!(settings.recording.quality, RecordingQuality::High);
        assert!(settings.recording.microphone_enabled);
        assert_eq!(settings.capture.framerate, 60);
        assert_eq!(settings.capture.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn format_and_quality_parse_case_insensitively() {
        assert_eq!("MOV".parse::<RecordingFileFormat>(), Ok(RecordingFileFormat::Mov));
        assert_eq!("High".parse::<RecordingQuality>(), Ok(RecordingQuality::High));
        assert!("avi".parse::<RecordingFileFormat>().is_err());
    }
}
