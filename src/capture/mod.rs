//! Capture stream adapter for screencap
//!
//! Narrow capability traits over a platform capture stream and the recording
//! sinks attached to it. The session controller only talks to these traits:
//! - [`CaptureStream`] - attach/detach outputs and sinks, start/stop capture
//! - [`RecordingSink`] - opaque handle writing one segment file
//! - [`CaptureDelegate`] - completions reported from the delivery context
//!
//! The production implementation drives `ffmpeg`, see [`ffmpeg`].

pub mod ffmpeg;

pub use ffmpeg::{FfmpegSinkBuilder, FfmpegStreamBuilder};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Result, ScreencapError};

/// Kind of content the user wants to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    #[default]
    Display,
    Window,
    Application,
}

impl CaptureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Display => "display",
            Self::Window => "window",
            Self::Application => "application",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Display => "Display",
            Self::Window => "Window",
            Self::Application => "Application",
        }
    }
}

impl std::str::FromStr for CaptureSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "display" => Ok(Self::Display),
            "window" => Ok(Self::Window),
            "application" => Ok(Self::Application),
            other => Err(format!("unknown capture source: {}", other)),
        }
    }
}

/// Opaque descriptor of the chosen capture target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentFilter {
    /// A whole display, by index
    Display { index: u32 },

    /// A single window
    Window { id: u64, title: Option<String> },

    /// The windows of one application, on a display
    Application { name: String, display: u32 },
}

impl ContentFilter {
    pub fn source(&self) -> CaptureSource {
        match self {
            Self::Display { .. } => CaptureSource::Display,
            Self::Window { .. } => CaptureSource::Window,
            Self::Application { .. } => CaptureSource::Application,
        }
    }
}

/// Sample outputs a stream can deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Screen,
    Audio,
    Microphone,
}

/// Media container of a recording file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFileType {
    Mp4,
    Mov,
    M4v,
}

impl OutputFileType {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::M4v => "m4v",
        }
    }
}

impl fmt::Display for OutputFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Video codec of a recording file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoCodec::H264 => f.write_str("h264"),
            VideoCodec::Hevc => f.write_str("hevc"),
        }
    }
}

/// Stream configuration built by the engine from the current settings
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfiguration {
    pub shows_cursor: bool,
    pub queue_depth: u32,
    pub excludes_current_process_audio: bool,

    /// Capture system audio
    pub captures_audio: bool,
    pub sample_rate: u32,
    pub channel_count: u16,

    /// Capture the microphone
    pub captures_microphone: bool,
    /// Microphone device (None = system default)
    pub microphone_device: Option<String>,
}

impl Default for StreamConfiguration {
    fn default() -> Self {
        Self {
            shows_cursor: true,
            queue_depth: 5,
            excludes_current_process_audio: true,
            captures_audio: false,
            sample_rate: 48_000,
            channel_count: 2,
            captures_microphone: false,
            microphone_device: None,
        }
    }
}

/// Containers and codecs a sink implementation can write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkCapabilities {
    pub file_types: Vec<OutputFileType>,
    pub video_codecs: Vec<VideoCodec>,
}

/// Everything a sink needs to write one segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfiguration {
    pub output_path: PathBuf,
    pub file_type: OutputFileType,
    pub video_codec: VideoCodec,
}

/// Completions reported by the capture subsystem from its delivery context
///
/// Implementations must not block: they are called from whatever thread the
/// adapter uses to observe its platform objects.
pub trait CaptureDelegate: Send + Sync {
    /// The attached sink finished detaching and its file is finalized
    fn sink_did_finish(&self);

    /// The attached sink failed while writing
    fn sink_did_fail(&self, error: ScreencapError);

    /// The stream stopped without being asked to
    fn stream_did_stop(&self, error: ScreencapError);
}

/// Opaque handle of one open segment writer
pub trait RecordingSink: Send + Sync {
    /// File the sink writes to
    fn output_path(&self) -> &Path;

    /// Lets adapters recover their concrete sink type
    fn as_any(&self) -> &dyn Any;
}

/// A running (or startable) platform capture stream
#[async_trait]
pub trait CaptureStream: Send + Sync {
    /// Enable delivery of one kind of samples
    fn add_output(&self, kind: OutputKind) -> Result<()>;

    /// Disable delivery of one kind of samples
    fn remove_output(&self, kind: OutputKind) -> Result<()>;

    /// Attach a sink; recording into it starts immediately if the stream runs
    fn attach_sink(&self, sink: &Arc<dyn RecordingSink>) -> Result<()>;

    /// Ask a sink to detach. Completion is reported later through
    /// [`CaptureDelegate::sink_did_finish`] or [`CaptureDelegate::sink_did_fail`].
    fn detach_sink(&self, sink: &Arc<dyn RecordingSink>) -> Result<()>;

    async fn start_capture(&self) -> Result<()>;

    async fn stop_capture(&self) -> Result<()>;
}

/// Builds capture streams
pub trait StreamBuilder: Send + Sync {
    fn make_stream(
        &self,
        filter: &ContentFilter,
        configuration: &StreamConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Arc<dyn CaptureStream>;
}

/// Builds recording sinks
pub trait SinkBuilder: Send + Sync {
    /// Containers and codecs this sink implementation supports
    fn capabilities(&self) -> SinkCapabilities;

    fn make_sink(
        &self,
        configuration: SinkConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Result<Arc<dyn RecordingSink>>;
}
