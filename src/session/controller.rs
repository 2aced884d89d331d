//! Recording session controller
//!
//! Owns the capture stream and the sink of the open segment, and drives them
//! through start, pause/resume cycles and stop/discard. Every piece of mutable
//! session state lives in one [`SessionState`] behind a `parking_lot::Mutex`
//! that is never held across an await or a call into the adapter.
//!
//! Control requests are serialized through an async gate (a fair
//! `tokio::sync::Mutex`, so queued requests run in arrival order). A request
//! of the same kind as the transition already in flight is rejected before it
//! queues. Completions from the adapter arrive on its delivery context through
//! [`SessionEvents`] and only touch state under the lock.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::phase::{Phase, RecordingOptions, Segment, Waiter, WaiterKind};
use super::stitcher::SegmentStitcher;
use crate::capture::{
    CaptureDelegate, CaptureStream, ContentFilter, OutputFileType, OutputKind, RecordingSink,
    SinkBuilder, SinkCapabilities, SinkConfiguration, StreamBuilder, StreamConfiguration,
    VideoCodec,
};
use crate::{Result, ScreencapError};

/// Upper bound on waiting for a detached segment to finish writing
const DETACH_TIMEOUT: Duration = Duration::from_secs(10);

/// Error callback for failures that have no waiting caller
pub type ErrorHandler = Arc<dyn Fn(ScreencapError) + Send + Sync>;

/// Callbacks registered for one session
#[derive(Clone)]
pub struct SessionHandlers {
    pub on_error: ErrorHandler,
}

impl SessionHandlers {
    pub fn new(on_error: impl Fn(ScreencapError) + Send + Sync + 'static) -> Self {
        Self {
            on_error: Arc::new(on_error),
        }
    }
}

/// Container and codec used by every segment of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub file_type: OutputFileType,
    pub video_codec: VideoCodec,
}

impl OutputFormat {
    /// Pick the caller's preference when the sink supports it, otherwise
    /// mp4/h264, then mov/hevc, then whatever the sink reports first.
    pub fn resolve(options: &RecordingOptions, capabilities: &SinkCapabilities) -> Self {
        let file_type = pick(
            options.preferred_file_type,
            &[OutputFileType::Mp4, OutputFileType::Mov],
            &capabilities.file_types,
        )
        .unwrap_or(OutputFileType::Mp4);

        let video_codec = pick(
            options.preferred_codec,
            &[VideoCodec::H264, VideoCodec::Hevc],
            &capabilities.video_codecs,
        )
        .unwrap_or(VideoCodec::H264);

        Self {
            file_type,
            video_codec,
        }
    }
}

fn pick<T: Copy + PartialEq>(preferred: Option<T>, fallbacks: &[T], supported: &[T]) -> Option<T> {
    preferred
        .into_iter()
        .chain(fallbacks.iter().copied())
        .find(|candidate| supported.contains(candidate))
        .or_else(|| supported.first().copied())
}

/// `<stem>_seg<index>.<ext>` next to the base output
pub fn segment_path(base: &Path, index: u32, extension: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "recording".to_string());
    base.with_file_name(format!("{}_seg{}.{}", stem, index, extension))
}

#[derive(Default)]
struct SessionState {
    phase: Phase,

    /// Bumped on every teardown; completions from older streams are ignored
    generation: u64,

    stream: Option<Arc<dyn CaptureStream>>,
    sink: Option<Arc<dyn RecordingSink>>,
    events: Option<Arc<dyn CaptureDelegate>>,

    active_segment: Option<Segment>,
    segments: Vec<Segment>,
    segment_index: u32,

    base_output: Option<PathBuf>,
    options: RecordingOptions,
    resolved: Option<OutputFormat>,

    waiter: Option<Waiter>,
    handlers: Option<SessionHandlers>,
    runtime: Option<Handle>,
}

impl SessionState {
    fn reset_segments(&mut self) {
        self.active_segment = None;
        self.segments.clear();
        self.segment_index = 0;
        self.base_output = None;
        self.resolved = None;
    }

    /// Move the open segment into the finalized list. Used on failure paths
    /// so recovery can still consider whatever it wrote.
    fn keep_partial_segment(&mut self) {
        if let Some(segment) = self.active_segment.take() {
            debug!("Keeping partial segment {} for recovery", segment.index);
            self.segments.push(segment);
        }
    }

    fn not_possible(&self) -> ScreencapError {
        ScreencapError::NotPossible(self.phase.to_string())
    }
}

struct Shared {
    state: Mutex<SessionState>,
    gate: tokio::sync::Mutex<()>,
    stitcher: SegmentStitcher,
    stream_builder: Arc<dyn StreamBuilder>,
    sink_builder: Arc<dyn SinkBuilder>,
}

/// Forwards adapter completions to the session that created the stream
struct SessionEvents {
    shared: Weak<Shared>,
    generation: u64,
}

impl CaptureDelegate for SessionEvents {
    fn sink_did_finish(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_sink_finished(self.generation);
        }
    }

    fn sink_did_fail(&self, error: ScreencapError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_sink_failed(self.generation, error);
        }
    }

    fn stream_did_stop(&self, error: ScreencapError) {
        if let Some(shared) = self.shared.upgrade() {
            shared.on_stream_stopped(self.generation, error);
        }
    }
}

async fn wait_for_detach(rx: oneshot::Receiver<Result<()>>) -> Result<()> {
    match tokio::time::timeout(DETACH_TIMEOUT, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(ScreencapError::SinkFailed(
            "Recording session was torn down".to_string(),
        )),
        Err(_) => Err(ScreencapError::SinkFailed(format!(
            "Segment writer did not finish within {}s",
            DETACH_TIMEOUT.as_secs()
        ))),
    }
}

impl Shared {
    fn on_sink_finished(&self, generation: u64) {
        let mut st = self.state.lock();
        if st.generation != generation {
            debug!("Ignoring sink completion from a previous session");
            return;
        }

        if let Some(segment) = st.active_segment.take() {
            info!("Segment {} finalized: {}", segment.index, segment.path.display());
            st.segments.push(segment);
        }
        st.sink = None;

        match st.waiter.take() {
            Some(waiter) => {
                if waiter.kind == WaiterKind::Pause {
                    st.phase = Phase::Paused;
                }
                waiter.resolve(Ok(()));
            }
            None if st.phase == Phase::Pausing => st.phase = Phase::Paused,
            None => {}
        }
    }

    fn on_sink_failed(self: &Arc<Self>, generation: u64, error: ScreencapError) {
        let (handler, runtime) = {
            let mut st = self.state.lock();
            if st.generation != generation {
                debug!("Ignoring sink failure from a previous session: {}", error);
                return;
            }

            error!("Recording output failed in phase {}: {}", st.phase, error);
            st.phase = Phase::Idle;
            st.keep_partial_segment();

            let handler = match st.waiter.take() {
                Some(waiter) => {
                    waiter.resolve(Err(error.clone()));
                    None
                }
                None => st.handlers.as_ref().map(|h| h.on_error.clone()),
            };
            (handler, st.runtime.clone())
        };

        if let Some(handler) = handler {
            handler(error);
        }

        match runtime {
            Some(runtime) => {
                let shared = self.clone();
                runtime.spawn(async move {
                    let _gate = shared.gate.lock().await;
                    let current = shared.state.lock().generation == generation;
                    if current {
                        shared.stop_and_reset(false).await;
                    }
                });
            }
            None => warn!("No runtime to tear down the failed session on"),
        }
    }

    fn on_stream_stopped(&self, generation: u64, error: ScreencapError) {
        let handler = {
            let mut st = self.state.lock();
            if st.generation != generation {
                debug!("Ignoring stream stop from a previous session: {}", error);
                return;
            }

            error!("Capture stream stopped in phase {}: {}", st.phase, error);
            st.generation += 1;
            st.phase = Phase::Idle;
            st.stream = None;
            st.sink = None;
            st.active_segment = None;

            match st.waiter.take() {
                Some(waiter) => {
                    waiter.resolve(Err(error.clone()));
                    None
                }
                None => st.handlers.as_ref().map(|h| h.on_error.clone()),
            }
        };

        if let Some(handler) = handler {
            handler(error);
        }
    }

    /// Release stream and sink and return to idle. Finalized segments are
    /// kept when `clear_segments` is false so a recovery pass can use them.
    async fn stop_and_reset(&self, clear_segments: bool) {
        let (stream, sink) = {
            let mut st = self.state.lock();
            st.generation += 1;
            st.phase = Phase::Idle;
            st.waiter = None;
            st.events = None;
            if clear_segments {
                st.reset_segments();
            } else {
                st.keep_partial_segment();
            }
            (st.stream.take(), st.sink.take())
        };

        let Some(stream) = stream else {
            return;
        };

        for kind in [OutputKind::Screen, OutputKind::Audio, OutputKind::Microphone] {
            let _ = stream.remove_output(kind);
        }
        if let Some(sink) = sink {
            if let Err(e) = stream.detach_sink(&sink) {
                debug!("Detach during teardown failed: {}", e);
            }
        }
        if let Err(e) = stream.stop_capture().await {
            warn!("Failed to stop capture stream: {}", e);
        }
        debug!("Session torn down");
    }

    /// Open the segment at `index` with the session's format, resolving the
    /// format first if this is the first segment.
    fn open_segment(&self, index: u32) -> Result<(Segment, Arc<dyn RecordingSink>)> {
        let (base, format, events) = {
            let mut st = self.state.lock();
            let base = st
                .base_output
                .clone()
                .ok_or_else(|| ScreencapError::InvalidSaveLocation("no output location".into()))?;
            let events = st
                .events
                .clone()
                .ok_or_else(|| st.not_possible())?;

            let format = match st.resolved {
                Some(format) => format,
                None => {
                    let format =
                        OutputFormat::resolve(&st.options, &self.sink_builder.capabilities());
                    st.resolved = Some(format);
                    let base = base.with_extension(format.file_type.extension());
                    st.base_output = Some(base);
                    debug!(
                        "Resolved output format {} / {}",
                        format.file_type, format.video_codec
                    );
                    format
                }
            };
            let base = st.base_output.clone().unwrap_or(base);
            (base, format, events)
        };

        let path = segment_path(&base, index, format.file_type.extension());
        if path.exists() {
            std::fs::remove_file(&path)?;
        }

        let sink = self.sink_builder.make_sink(
            SinkConfiguration {
                output_path: path.clone(),
                file_type: format.file_type,
                video_codec: format.video_codec,
            },
            events,
        )?;

        Ok((Segment { index, path }, sink))
    }
}

/// Drives one recording session at a time
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(
        stream_builder: Arc<dyn StreamBuilder>,
        sink_builder: Arc<dyn SinkBuilder>,
        stitcher: SegmentStitcher,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SessionState::default()),
                gate: tokio::sync::Mutex::new(()),
                stitcher,
                stream_builder,
                sink_builder,
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    /// Index of the newest segment
    pub fn segment_index(&self) -> u32 {
        self.shared.state.lock().segment_index
    }

    /// Finalized segments, in recording order
    pub fn segments(&self) -> Vec<Segment> {
        self.shared.state.lock().segments.clone()
    }

    pub fn active_segment(&self) -> Option<Segment> {
        self.shared.state.lock().active_segment.clone()
    }

    pub fn output_format(&self) -> Option<OutputFormat> {
        self.shared.state.lock().resolved
    }

    /// Where the stitched recording will be written
    pub fn base_output(&self) -> Option<PathBuf> {
        self.shared.state.lock().base_output.clone()
    }

    /// Start a new session writing towards `output`.
    ///
    /// Any stream still owned from a previous session is torn down first.
    pub async fn start(
        &self,
        filter: &ContentFilter,
        configuration: &StreamConfiguration,
        output: PathBuf,
        options: RecordingOptions,
        handlers: SessionHandlers,
    ) -> Result<()> {
        let _gate = self.shared.gate.lock().await;

        let owns_stream = self.shared.state.lock().stream.is_some();
        if owns_stream {
            info!("Tearing down previous capture stream");
            self.shared.stop_and_reset(true).await;
        }

        let events: Arc<dyn CaptureDelegate> = {
            let mut st = self.shared.state.lock();
            st.reset_segments();
            st.generation += 1;
            st.waiter = None;
            st.base_output = Some(output);
            st.options = options;
            st.handlers = Some(handlers);
            st.runtime = Handle::try_current().ok();

            let events: Arc<dyn CaptureDelegate> = Arc::new(SessionEvents {
                shared: Arc::downgrade(&self.shared),
                generation: st.generation,
            });
            st.events = Some(events.clone());
            events
        };

        let stream = self
            .shared
            .stream_builder
            .make_stream(filter, configuration, events);
        self.shared.state.lock().stream = Some(stream.clone());

        match self.open_and_start(&stream, configuration).await {
            Ok(()) => {
                let mut st = self.shared.state.lock();
                st.phase = Phase::Recording;
                info!(
                    "Recording started ({:?}), segment 0 at {}",
                    filter.source(),
                    st.active_segment
                        .as_ref()
                        .map(|s| s.path.display().to_string())
                        .unwrap_or_default()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.shared.stop_and_reset(true).await;
                Err(e)
            }
        }
    }

    async fn open_and_start(
        &self,
        stream: &Arc<dyn CaptureStream>,
        configuration: &StreamConfiguration,
    ) -> Result<()> {
        let (segment, sink) = self.shared.open_segment(0)?;
        {
            let mut st = self.shared.state.lock();
            st.active_segment = Some(segment);
            st.sink = Some(sink.clone());
        }

        stream.add_output(OutputKind::Screen)?;
        if configuration.captures_audio {
            stream.add_output(OutputKind::Audio)?;
        }
        if configuration.captures_microphone {
            stream.add_output(OutputKind::Microphone)?;
        }

        stream.attach_sink(&sink)?;
        stream.start_capture().await
    }

    /// Finalize the open segment and wait until it is closed
    pub async fn pause(&self) -> Result<()> {
        {
            let st = self.shared.state.lock();
            if st.phase == Phase::Pausing {
                return Err(st.not_possible());
            }
        }
        let _gate = self.shared.gate.lock().await;

        let (stream, sink, rx) = {
            let mut st = self.shared.state.lock();
            let (Phase::Recording, Some(stream), Some(sink)) =
                (st.phase, st.stream.clone(), st.sink.clone())
            else {
                return Err(st.not_possible());
            };

            st.phase = Phase::Pausing;
            let (waiter, rx) = Waiter::new(WaiterKind::Pause);
            st.waiter = Some(waiter);
            (stream, sink, rx)
        };

        debug!("Pausing: detaching segment writer");
        if let Err(e) = stream.detach_sink(&sink) {
            let mut st = self.shared.state.lock();
            st.waiter = None;
            if st.phase == Phase::Pausing {
                st.phase = Phase::Recording;
            }
            return Err(e);
        }

        if let Err(e) = wait_for_detach(rx).await {
            error!("Pause did not complete: {}", e);
            self.shared.stop_and_reset(false).await;
            return Err(e);
        }
        info!("Recording paused");
        Ok(())
    }

    /// Open the next segment. Never waits: fails if a transition is in flight.
    pub fn resume(&self) -> Result<()> {
        let _gate = self.shared.gate.try_lock().map_err(|_| {
            ScreencapError::NotPossible("another transition is in progress".to_string())
        })?;

        let (stream, index, generation) = {
            let mut st = self.shared.state.lock();
            let (Phase::Paused, Some(stream), true) =
                (st.phase, st.stream.clone(), st.sink.is_none())
            else {
                return Err(st.not_possible());
            };

            st.phase = Phase::Resuming;
            st.segment_index += 1;
            (stream, st.segment_index, st.generation)
        };

        let opened = self.shared.open_segment(index).and_then(|(segment, sink)| {
            stream.attach_sink(&sink)?;
            Ok((segment, sink))
        });

        let mut st = self.shared.state.lock();
        match opened {
            Ok((segment, sink)) if st.generation == generation => {
                info!("Recording resumed, segment {} at {}", index, segment.path.display());
                st.active_segment = Some(segment);
                st.sink = Some(sink);
                st.phase = Phase::Recording;
                Ok(())
            }
            Ok(_) => Err(ScreencapError::StreamFailed(
                "capture stream stopped while resuming".to_string(),
            )),
            Err(e) => {
                warn!("Failed to resume: {}", e);
                if st.generation == generation {
                    st.segment_index -= 1;
                    st.active_segment = None;
                    st.sink = None;
                    st.phase = Phase::Paused;
                }
                Err(e)
            }
        }
    }

    /// Finalize the session and stitch its segments into the base output
    pub async fn stop(&self) -> Result<PathBuf> {
        {
            let st = self.shared.state.lock();
            if st.phase == Phase::Stopping {
                return Err(st.not_possible());
            }
        }
        let _gate = self.shared.gate.lock().await;

        let pending = {
            let mut st = self.shared.state.lock();
            match (st.phase, st.stream.clone(), st.sink.clone()) {
                (Phase::Recording, Some(stream), Some(sink)) => {
                    st.phase = Phase::Stopping;
                    let (waiter, rx) = Waiter::new(WaiterKind::Stop);
                    st.waiter = Some(waiter);
                    Some((stream, sink, rx))
                }
                (Phase::Paused, _, _) => {
                    st.phase = Phase::Stopping;
                    None
                }
                _ => return Err(st.not_possible()),
            }
        };

        if let Some((stream, sink, rx)) = pending {
            let finalized = match stream.detach_sink(&sink) {
                Ok(()) => wait_for_detach(rx).await,
                Err(e) => Err(e),
            };
            if let Err(e) = finalized {
                error!("Failed to finalize last segment: {}", e);
                self.shared.stop_and_reset(false).await;
                return Err(e);
            }
        }

        let (segments, base, format) = {
            let st = self.shared.state.lock();
            (
                st.segments.iter().map(|s| s.path.clone()).collect::<Vec<_>>(),
                st.base_output.clone(),
                st.resolved,
            )
        };
        let (Some(base), Some(format)) = (base, format) else {
            self.shared.stop_and_reset(false).await;
            return Err(ScreencapError::InvalidSaveLocation(
                "no output location".to_string(),
            ));
        };

        match self
            .shared
            .stitcher
            .stitch(&segments, &base, format.file_type)
            .await
        {
            Ok(path) => {
                info!("Recording saved to {}", path.display());
                self.shared.stop_and_reset(true).await;
                Ok(path)
            }
            Err(e) => {
                error!("Failed to stitch {} segments: {}", segments.len(), e);
                self.shared.stop_and_reset(false).await;
                Err(e)
            }
        }
    }

    /// Throw the session away, deleting every segment file. Always completes.
    pub async fn discard(&self) {
        {
            let st = self.shared.state.lock();
            if st.phase == Phase::Discarding {
                warn!("Discard already in progress");
                return;
            }
        }
        let _gate = self.shared.gate.lock().await;

        let mut doomed: Vec<PathBuf> = Vec::new();
        let pending = {
            let mut st = self.shared.state.lock();
            match (st.phase, st.stream.clone(), st.sink.clone()) {
                (Phase::Recording, Some(stream), Some(sink)) => {
                    st.phase = Phase::Discarding;
                    doomed.extend(st.active_segment.as_ref().map(|s| s.path.clone()));
                    let (waiter, rx) = Waiter::new(WaiterKind::Discard);
                    st.waiter = Some(waiter);
                    Some((stream, sink, rx, st.generation))
                }
                (Phase::Recording, _, _) | (Phase::Paused, _, _) => {
                    st.phase = Phase::Discarding;
                    None
                }
                (phase, _, _) => {
                    debug!("Nothing to discard in phase {}", phase);
                    return;
                }
            }
        };

        if let Some((stream, sink, rx, generation)) = pending {
            match stream.detach_sink(&sink) {
                Ok(()) => {
                    if let Err(e) = wait_for_detach(rx).await {
                        warn!("Discarded segment did not finalize cleanly: {}", e);
                    }
                }
                Err(e) => {
                    // No caller waits on a discard, so the failure goes to the handler
                    self.shared.state.lock().waiter = None;
                    self.shared.on_sink_failed(generation, e);
                }
            }
        }

        {
            let st = self.shared.state.lock();
            doomed.extend(st.segments.iter().map(|s| s.path.clone()));
            doomed.extend(st.active_segment.as_ref().map(|s| s.path.clone()));
        }
        doomed.sort();
        doomed.dedup();

        for path in &doomed {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Deleted {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
            }
        }

        self.shared.stop_and_reset(true).await;
        info!("Recording discarded ({} files)", doomed.len());
    }

    /// Salvage what a failed session left behind
    pub async fn recover_partial_recording(&self) -> Option<PathBuf> {
        let _gate = self.shared.gate.lock().await;

        let (base, format, segments) = {
            let st = self.shared.state.lock();
            (
                st.base_output.clone(),
                st.resolved,
                st.segments.iter().map(|s| s.path.clone()).collect::<Vec<_>>(),
            )
        };

        let recovered = self.salvage(base, format, segments).await;
        self.shared.state.lock().reset_segments();

        match &recovered {
            Some(path) => info!("Recovered partial recording at {}", path.display()),
            None => warn!("Nothing to recover"),
        }
        recovered
    }

    async fn salvage(
        &self,
        base: Option<PathBuf>,
        format: Option<OutputFormat>,
        segments: Vec<PathBuf>,
    ) -> Option<PathBuf> {
        let base = base?;
        if file_size(&base) > 0 {
            return Some(base);
        }

        let format = format?;
        let segments: Vec<PathBuf> = segments
            .into_iter()
            .filter(|path| file_size(path) > 0)
            .collect();
        if segments.is_empty() {
            return None;
        }

        match self
            .shared
            .stitcher
            .stitch(&segments, &base, format.file_type)
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Recovery stitch failed, falling back to largest segment: {}", e);
                segments
                    .into_iter()
                    .map(|path| (file_size(&path), path))
                    .filter(|(size, _)| *size > 0)
                    .max_by_key(|(size, _)| *size)
                    .map(|(_, path)| path)
            }
        }
    }
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
