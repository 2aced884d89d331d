//! Capture adapter backed by the `ffmpeg` binary
//!
//! Each open segment is one ffmpeg process grabbing the screen (and audio)
//! into the sink's file. Detaching a sink asks ffmpeg to quit by writing `q`
//! to its stdin; a watcher thread waits for the process and reports the
//! outcome to the [`CaptureDelegate`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::capture::{
    CaptureDelegate, CaptureStream, ContentFilter, OutputFileType, OutputKind, RecordingSink,
    SinkBuilder, SinkCapabilities, SinkConfiguration, StreamBuilder, StreamConfiguration,
    VideoCodec,
};
use crate::config::CaptureSettings;
use crate::{Result, ScreencapError};

/// How long `stop_capture` waits for a segment process to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of ffmpeg stderr kept for error messages
const STDERR_TAIL_LINES: usize = 8;

/// Platform grabbing backend used for the video input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBackend {
    /// X11 screen grabbing (Linux)
    X11Grab,
    /// AVFoundation devices (macOS)
    AvFoundation,
    /// GDI screen grabbing (Windows)
    GdiGrab,
}

impl InputBackend {
    /// Backend for the platform we are running on
    pub fn native() -> Self {
        if cfg!(target_os = "macos") {
            InputBackend::AvFoundation
        } else if cfg!(target_os = "windows") {
            InputBackend::GdiGrab
        } else {
            InputBackend::X11Grab
        }
    }
}

/// Check whether an ffmpeg binary can be executed
pub fn ffmpeg_available(ffmpeg: &Path) -> bool {
    Command::new(ffmpeg)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Map the tail of ffmpeg's stderr to an error
pub fn classify_failure(stderr_tail: &str) -> ScreencapError {
    let lower = stderr_tail.to_lowercase();
    if lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("broken pipe")
        || lower.contains("lost connection")
    {
        return ScreencapError::ConnectionInterrupted;
    }

    let message = stderr_tail.trim();
    if message.is_empty() {
        ScreencapError::SinkFailed("ffmpeg exited unexpectedly".to_string())
    } else {
        ScreencapError::SinkFailed(message.to_string())
    }
}

/// Build the full ffmpeg argument list for one segment
pub fn build_segment_args(
    backend: InputBackend,
    filter: &ContentFilter,
    configuration: &StreamConfiguration,
    outputs: &HashSet<OutputKind>,
    settings: &CaptureSettings,
    sink: &SinkConfiguration,
) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostats", "-y"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let wants_system_audio = configuration.captures_audio && outputs.contains(&OutputKind::Audio);
    let wants_microphone =
        configuration.captures_microphone && outputs.contains(&OutputKind::Microphone);
    let microphone = configuration
        .microphone_device
        .clone()
        .unwrap_or_else(|| settings.microphone_source.clone());

    let mut audio_inputs = 0usize;
    let cursor = if configuration.shows_cursor { "1" } else { "0" };
    let framerate = settings.framerate.to_string();

    match backend {
        InputBackend::X11Grab => {
            args.extend(
                ["-f", "x11grab", "-framerate", framerate.as_str(), "-draw_mouse", cursor]
                    .iter()
                    .map(|s| s.to_string()),
            );
            if let ContentFilter::Window { id, .. } = filter {
                args.push("-window_id".to_string());
                args.push(id.to_string());
            }
            args.push("-i".to_string());
            args.push(x11_display(&settings.display, filter));

            if wants_microphone {
                args.extend(["-f", "pulse", "-i"].iter().map(|s| s.to_string()));
                args.push(microphone);
                audio_inputs += 1;
            }
            if wants_system_audio {
                args.extend(["-f", "pulse", "-i"].iter().map(|s| s.to_string()));
                args.push(settings.system_audio_source.clone());
                audio_inputs += 1;
            }
        }
        InputBackend::AvFoundation => {
            let screen = match filter {
                ContentFilter::Display { index } => index.to_string(),
                ContentFilter::Application { display, .. } => display.to_string(),
                ContentFilter::Window { .. } => settings.display.clone(),
            };
            let audio = if wants_microphone {
                audio_inputs += 1;
                microphone
            } else {
                "none".to_string()
            };
            args.extend(
                [
                    "-f",
                    "avfoundation",
                    "-framerate",
                    framerate.as_str(),
                    "-capture_cursor",
                    cursor,
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            args.push("-i".to_string());
            args.push(format!("{}:{}", screen, audio));
        }
        InputBackend::GdiGrab => {
            args.extend(
                ["-f", "gdigrab", "-framerate", framerate.as_str(), "-draw_mouse", cursor]
                    .iter()
                    .map(|s| s.to_string()),
            );
            args.push("-i".to_string());
            match filter {
                ContentFilter::Window {
                    title: Some(title), ..
                } => args.push(format!("title={}", title)),
                _ => args.push("desktop".to_string()),
            }
            if wants_microphone {
                args.extend(["-f", "dshow", "-i"].iter().map(|s| s.to_string()));
                args.push(format!("audio={}", microphone));
                audio_inputs += 1;
            }
        }
    }

    if wants_system_audio && backend != InputBackend::X11Grab {
        warn!("System audio capture is not supported by the {:?} backend", backend);
    }

    match audio_inputs {
        0 => {}
        1 if backend == InputBackend::AvFoundation => {
            args.extend(["-map", "0:v", "-map", "0:a"].iter().map(|s| s.to_string()));
        }
        1 => {
            args.extend(["-map", "0:v", "-map", "1:a"].iter().map(|s| s.to_string()));
        }
        _ => {
            args.push("-filter_complex".to_string());
            args.push("[1:a][2:a]amix=inputs=2:duration=longest[aout]".to_string());
            args.extend(["-map", "0:v", "-map", "[aout]"].iter().map(|s| s.to_string()));
        }
    }

    match sink.video_codec {
        VideoCodec::H264 => {
            args.extend(["-c:v", "libx264", "-preset", "veryfast"].iter().map(|s| s.to_string()))
        }
        VideoCodec::Hevc => {
            args.extend(["-c:v", "libx265", "-preset", "fast"].iter().map(|s| s.to_string()))
        }
    }
    args.extend(["-pix_fmt", "yuv420p"].iter().map(|s| s.to_string()));

    if audio_inputs > 0 {
        args.extend(["-c:a", "aac"].iter().map(|s| s.to_string()));
        args.push("-ar".to_string());
        args.push(configuration.sample_rate.to_string());
        args.push("-ac".to_string());
        args.push(configuration.channel_count.to_string());
    }

    args.push("-f".to_string());
    args.push(muxer_name(sink.file_type).to_string());
    args.push(sink.output_path.to_string_lossy().to_string());
    args
}

/// ffmpeg muxer for a container
pub fn muxer_name(file_type: OutputFileType) -> &'static str {
    match file_type {
        OutputFileType::Mp4 => "mp4",
        OutputFileType::Mov => "mov",
        OutputFileType::M4v => "ipod",
    }
}

fn x11_display(display: &str, filter: &ContentFilter) -> String {
    let base = if display.is_empty() {
        std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string())
    } else {
        display.to_string()
    };

    match filter {
        ContentFilter::Display { index } if !base.contains('.') => format!("{}.{}", base, index),
        _ => base,
    }
}

/// Builds [`FfmpegStream`]s
pub struct FfmpegStreamBuilder {
    settings: CaptureSettings,
    backend: InputBackend,
}

impl FfmpegStreamBuilder {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            backend: InputBackend::native(),
        }
    }
}

impl StreamBuilder for FfmpegStreamBuilder {
    fn make_stream(
        &self,
        filter: &ContentFilter,
        configuration: &StreamConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Arc<dyn CaptureStream> {
        Arc::new(FfmpegStream {
            filter: filter.clone(),
            configuration: configuration.clone(),
            settings: self.settings.clone(),
            backend: self.backend,
            delegate,
            inner: Mutex::new(StreamInner::default()),
        })
    }
}

/// Builds [`FfmpegSink`]s
#[derive(Debug, Default)]
pub struct FfmpegSinkBuilder;

impl SinkBuilder for FfmpegSinkBuilder {
    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            file_types: vec![OutputFileType::Mp4, OutputFileType::Mov, OutputFileType::M4v],
            video_codecs: vec![VideoCodec::H264, VideoCodec::Hevc],
        }
    }

    fn make_sink(
        &self,
        configuration: SinkConfiguration,
        _delegate: Arc<dyn CaptureDelegate>,
    ) -> Result<Arc<dyn RecordingSink>> {
        if let Some(parent) = configuration.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Arc::new(FfmpegSink { configuration }))
    }
}

/// Segment writer configuration; the process lives in the stream
#[derive(Debug)]
pub struct FfmpegSink {
    configuration: SinkConfiguration,
}

impl RecordingSink for FfmpegSink {
    fn output_path(&self) -> &Path {
        &self.configuration.output_path
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SegmentProcess {
    stdin: Option<ChildStdin>,
    detaching: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
}

impl SegmentProcess {
    fn request_quit(&mut self) -> Result<()> {
        self.detaching.store(true, Ordering::SeqCst);
        match self.stdin.take() {
            Some(mut stdin) => stdin
                .write_all(b"q\n")
                .and_then(|_| stdin.flush())
                .map_err(|e| ScreencapError::SinkFailed(format!("Failed to stop ffmpeg: {}", e))),
            None => Ok(()),
        }
    }
}

struct AttachedSink {
    configuration: SinkConfiguration,
    process: Option<SegmentProcess>,
}

#[derive(Default)]
struct StreamInner {
    running: bool,
    outputs: HashSet<OutputKind>,
    attached: Option<AttachedSink>,
    /// Exit flags of processes asked to quit
    stopping: Vec<Arc<AtomicBool>>,
}

/// A logical capture stream; video is grabbed per attached sink
pub struct FfmpegStream {
    filter: ContentFilter,
    configuration: StreamConfiguration,
    settings: CaptureSettings,
    backend: InputBackend,
    delegate: Arc<dyn CaptureDelegate>,
    inner: Mutex<StreamInner>,
}

impl FfmpegStream {
    fn spawn_segment(
        &self,
        outputs: &HashSet<OutputKind>,
        sink: &SinkConfiguration,
    ) -> Result<SegmentProcess> {
        let args = build_segment_args(
            self.backend,
            &self.filter,
            &self.configuration,
            outputs,
            &self.settings,
            sink,
        );
        debug!("Spawning ffmpeg: {} {}", self.settings.ffmpeg_path.display(), args.join(" "));

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScreencapError::CaptureFailed(format!(
                    "Failed to launch {}: {}",
                    self.settings.ffmpeg_path.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();
        let detaching = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));

        let delegate = self.delegate.clone();
        let watcher_detaching = detaching.clone();
        let watcher_exited = exited.clone();
        let path = sink.output_path.clone();

        std::thread::Builder::new()
            .name("ffmpeg-segment".to_string())
            .spawn(move || {
                let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
                if let Some(stderr) = stderr {
                    for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                }

                let status = child.wait();
                watcher_exited.store(true, Ordering::SeqCst);
                let tail = tail.into_iter().collect::<Vec<_>>().join("\n");

                match status {
                    Ok(status) if status.success() && watcher_detaching.load(Ordering::SeqCst) => {
                        info!("Segment finalized: {}", path.display());
                        delegate.sink_did_finish();
                    }
                    Ok(status) => {
                        warn!("ffmpeg exited with {} for {}", status, path.display());
                        delegate.sink_did_fail(classify_failure(&tail));
                    }
                    Err(e) => {
                        delegate.sink_did_fail(ScreencapError::SinkFailed(e.to_string()));
                    }
                }
            })
            .map_err(|e| ScreencapError::CaptureFailed(e.to_string()))?;

        Ok(SegmentProcess {
            stdin,
            detaching,
            exited,
        })
    }
}

fn ffmpeg_sink(sink: &Arc<dyn RecordingSink>) -> Result<&FfmpegSink> {
    sink.as_any()
        .downcast_ref::<FfmpegSink>()
        .ok_or_else(|| ScreencapError::CaptureFailed("Sink was not built for ffmpeg".to_string()))
}

#[async_trait]
impl CaptureStream for FfmpegStream {
    fn add_output(&self, kind: OutputKind) -> Result<()> {
        self.inner.lock().outputs.insert(kind);
        Ok(())
    }

    fn remove_output(&self, kind: OutputKind) -> Result<()> {
        self.inner.lock().outputs.remove(&kind);
        Ok(())
    }

    fn attach_sink(&self, sink: &Arc<dyn RecordingSink>) -> Result<()> {
        let configuration = ffmpeg_sink(sink)?.configuration.clone();

        let (running, outputs) = {
            let inner = self.inner.lock();
            if inner.attached.is_some() {
                return Err(ScreencapError::CaptureFailed(
                    "A recording output is already attached".to_string(),
                ));
            }
            (inner.running, inner.outputs.clone())
        };

        let process = if running {
            Some(self.spawn_segment(&outputs, &configuration)?)
        } else {
            None
        };

        self.inner.lock().attached = Some(AttachedSink {
            configuration,
            process,
        });
        Ok(())
    }

    fn detach_sink(&self, sink: &Arc<dyn RecordingSink>) -> Result<()> {
        let path = sink.output_path().to_path_buf();
        let attached = {
            let mut inner = self.inner.lock();
            let owned = inner
                .attached
                .as_ref()
                .is_some_and(|attached| attached.configuration.output_path == path);
            if owned {
                inner.attached.take()
            } else {
                None
            }
        };

        let Some(attached) = attached else {
            return Err(ScreencapError::CaptureFailed(format!(
                "Recording output {} is not attached",
                path.display()
            )));
        };

        match attached.process {
            Some(mut process) => {
                let result = process.request_quit();
                let mut inner = self.inner.lock();
                inner.stopping.retain(|exited| !exited.load(Ordering::SeqCst));
                inner.stopping.push(process.exited.clone());
                result
            }
            None => {
                // Never started writing, nothing to wait for.
                self.delegate.sink_did_finish();
                Ok(())
            }
        }
    }

    async fn start_capture(&self) -> Result<()> {
        let (configuration, outputs) = {
            let mut inner = self.inner.lock();
            if inner.running {
                return Ok(());
            }
            inner.running = true;
            (
                inner.attached.as_ref().map(|a| a.configuration.clone()),
                inner.outputs.clone(),
            )
        };

        if let Some(configuration) = configuration {
            match self.spawn_segment(&outputs, &configuration) {
                Ok(process) => {
                    let mut inner = self.inner.lock();
                    if let Some(attached) = inner.attached.as_mut() {
                        attached.process = Some(process);
                    }
                }
                Err(e) => {
                    self.inner.lock().running = false;
                    return Err(e);
                }
            }
        }

        info!("ffmpeg capture started");
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        let mut waiting = {
            let mut inner = self.inner.lock();
            inner.running = false;
            if let Some(mut process) = inner.attached.as_mut().and_then(|a| a.process.take()) {
                if let Err(e) = process.request_quit() {
                    warn!("{}", e);
                }
                inner.stopping.push(process.exited.clone());
            }
            std::mem::take(&mut inner.stopping)
        };

        let deadline = Instant::now() + STOP_TIMEOUT;
        while !waiting.is_empty() && Instant::now() < deadline {
            waiting.retain(|exited| !exited.load(Ordering::SeqCst));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !waiting.is_empty() {
            warn!("{} ffmpeg process(es) did not exit in time", waiting.len());
        }

        info!("ffmpeg capture stopped");
        Ok(())
    }
}
