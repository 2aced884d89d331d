//! CLI argument definitions using clap

use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::capture::CaptureSource;
use crate::config::{RecordingFileFormat, RecordingQuality, RecordingSettings};

/// screencap - Screen, window and application recording with pause/resume
#[derive(Parser, Debug)]
#[command(name = "screencap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record the screen, a window or an application
    Record(RecordArgs),

    /// List recent recordings
    Recent {
        /// Maximum number of recordings to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check capture permissions and prerequisites
    Permissions {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// Source type: display, window, application
    #[arg(long, default_value = "display")]
    pub source: CaptureSource,

    /// Recording duration in seconds (0 = manual stop)
    #[arg(long, default_value_t = 0)]
    pub duration: u64,

    /// Output format: mp4, mov
    #[arg(long)]
    pub format: Option<RecordingFileFormat>,

    /// Quality: standard, high
    #[arg(long)]
    pub quality: Option<RecordingQuality>,

    /// Output directory
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Display index (0-based)
    #[arg(long)]
    pub display_index: Option<u32>,

    /// Window id to capture (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_window_id)]
    pub window_id: Option<u64>,

    /// Application name to capture
    #[arg(long)]
    pub application: Option<String>,

    /// Enable microphone
    #[arg(long)]
    pub mic: bool,

    /// Enable system audio
    #[arg(long)]
    pub system_audio: bool,

    /// Seconds to count down before recording
    #[arg(long, default_value_t = 0)]
    pub countdown: u32,

    /// Ignore stdin; stop with Ctrl-C or --duration only
    #[arg(long)]
    pub no_input: bool,
}

impl RecordArgs {
    /// Recording settings for this run, falling back to the configured ones
    pub fn recording_settings(&self, configured: &RecordingSettings) -> RecordingSettings {
        RecordingSettings {
            countdown_seconds: self.countdown,
            camera_enabled: false,
            microphone_enabled: self.mic,
            system_audio_enabled: self.system_audio,
            output_format: self.format.unwrap_or(configured.output_format),
            quality: self.quality.unwrap_or(configured.quality),
        }
    }
}

fn parse_window_id(value: &str) -> Result<u64, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid window id '{}': {}", value, e))
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}
