//! In-memory stand-ins for the capture adapter and the engine collaborators

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use screencap::capture::{
    CaptureDelegate, CaptureSource, CaptureStream, ContentFilter, OutputFileType, OutputKind,
    RecordingSink, SinkBuilder, SinkCapabilities, SinkConfiguration, StreamBuilder,
    StreamConfiguration, VideoCodec,
};
use screencap::engine::{
    CaptureService, Clock, ContentSelector, OutputDirectoryProvider, PermissionService,
    RecordingObserver, RecordingState,
};
use screencap::session::{RecordingOptions, SegmentMerger, SessionHandlers};
use screencap::storage::Recording;
use screencap::{Result, ScreencapError};

// Capture adapter

pub struct FakeSink {
    path: PathBuf,
}

impl RecordingSink for FakeSink {
    fn output_path(&self) -> &Path {
        &self.path
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stream that writes a file per attached sink and reports detaches either
/// immediately or when the test says so
pub struct FakeStream {
    delegate: Arc<dyn CaptureDelegate>,
    pub configuration: StreamConfiguration,
    auto_finish: bool,
    fail_start: bool,
    pub fail_attach: AtomicBool,
    pub fail_detach: AtomicBool,
    segment_sizes: Arc<Mutex<VecDeque<usize>>>,

    pub outputs: Mutex<Vec<OutputKind>>,
    pub attached: Mutex<Vec<PathBuf>>,
    pub attach_calls: AtomicUsize,
    pub detach_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pending_detaches: AtomicUsize,
}

impl FakeStream {
    /// Report every outstanding detach as finished
    pub fn finish_pending(&self) {
        let pending = self.pending_detaches.swap(0, Ordering::SeqCst);
        for _ in 0..pending {
            self.delegate.sink_did_finish();
        }
    }

    pub fn fail_sink(&self, error: ScreencapError) {
        self.pending_detaches.store(0, Ordering::SeqCst);
        self.delegate.sink_did_fail(error);
    }

    pub fn stop_unexpectedly(&self, error: ScreencapError) {
        self.delegate.stream_did_stop(error);
    }

    pub fn pending(&self) -> usize {
        self.pending_detaches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureStream for FakeStream {
    fn add_output(&self, kind: OutputKind) -> Result<()> {
        self.outputs.lock().push(kind);
        Ok(())
    }

    fn remove_output(&self, kind: OutputKind) -> Result<()> {
        self.outputs.lock().retain(|k| *k != kind);
        Ok(())
    }

    fn attach_sink(&self, sink: &Arc<dyn RecordingSink>) -> Result<()> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(ScreencapError::SinkFailed("attach refused".to_string()));
        }

        let path = sink.output_path().to_path_buf();
        let size = self.segment_sizes.lock().pop_front().unwrap_or(16);
        let index = self.attached.lock().len();
        let byte = b'a' + (index % 26) as u8;
        std::fs::write(&path, vec![byte; size])?;
        self.attached.lock().push(path);
        Ok(())
    }

    fn detach_sink(&self, _sink: &Arc<dyn RecordingSink>) -> Result<()> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(ScreencapError::SinkFailed("detach refused".to_string()));
        }

        if self.auto_finish {
            self.delegate.sink_did_finish();
        } else {
            self.pending_detaches.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn start_capture(&self) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ScreencapError::CaptureFailed("no display".to_string()));
        }
        Ok(())
    }

    async fn stop_capture(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeStreamBuilder {
    pub manual_finish: AtomicBool,
    pub fail_start: AtomicBool,
    /// Sizes of the files written per attach, in order (default 16 bytes)
    pub segment_sizes: Arc<Mutex<VecDeque<usize>>>,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeStreamBuilder {
    pub fn latest(&self) -> Arc<FakeStream> {
        self.streams
            .lock()
            .last()
            .cloned()
            .expect("no stream was built")
    }

    pub fn set_segment_sizes(&self, sizes: &[usize]) {
        *self.segment_sizes.lock() = sizes.iter().copied().collect();
    }
}

impl StreamBuilder for FakeStreamBuilder {
    fn make_stream(
        &self,
        _filter: &ContentFilter,
        configuration: &StreamConfiguration,
        delegate: Arc<dyn CaptureDelegate>,
    ) -> Arc<dyn CaptureStream> {
        let stream = Arc::new(FakeStream {
            delegate,
            configuration: configuration.clone(),
            auto_finish: !self.manual_finish.load(Ordering::SeqCst),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            fail_attach: AtomicBool::new(false),
            fail_detach: AtomicBool::new(false),
            segment_sizes: self.segment_sizes.clone(),
            outputs: Mutex::new(Vec::new()),
            attached: Mutex::new(Vec::new()),
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            pending_detaches: AtomicUsize::new(0),
        });
        self.streams.lock().push(stream.clone());
        stream
    }
}

pub struct FakeSinkBuilder {
    pub capabilities: Mutex<SinkCapabilities>,
    pub made: Mutex<Vec<SinkConfiguration>>,
    pub fail_make: AtomicBool,
}

impl Default for FakeSinkBuilder {
    fn default() -> Self {
        Self {
            capabilities: Mutex::new(SinkCapabilities {
                file_types: vec![OutputFileType::Mov, OutputFileType::Mp4],
                video_codecs: vec![VideoCodec::Hevc, VideoCodec::H264],
            }),
            made: Mutex::new(Vec::new()),
            fail_make: AtomicBool::new(false),
        }
    }
}

impl SinkBuilder for FakeSinkBuilder {
    fn capabilities(&self) -> SinkCapabilities {
        self.capabilities.lock().clone()
    }

    fn make_sink(
        &self,
        configuration: SinkConfiguration,
        _delegate: Arc<dyn CaptureDelegate>,
    ) -> Result<Arc<dyn RecordingSink>> {
        if self.fail_make.load(Ordering::SeqCst) {
            return Err(ScreencapError::SinkFailed("cannot open writer".to_string()));
        }
        let path = configuration.output_path.clone();
        self.made.lock().push(configuration);
        Ok(Arc::new(FakeSink { path }))
    }
}

/// Concatenates segment bytes into the destination
pub struct PassThroughMerger;

#[async_trait]
impl SegmentMerger for PassThroughMerger {
    async fn merge(
        &self,
        segments: &[PathBuf],
        destination: &Path,
        _file_type: OutputFileType,
    ) -> Result<PathBuf> {
        let mut merged = Vec::new();
        for segment in segments {
            merged.extend(std::fs::read(segment)?);
        }
        std::fs::write(destination, merged)?;
        Ok(destination.to_path_buf())
    }
}

pub struct FailingMerger;

#[async_trait]
impl SegmentMerger for FailingMerger {
    async fn merge(&self, _: &[PathBuf], _: &Path, _: OutputFileType) -> Result<PathBuf> {
        Err(ScreencapError::FileWriteFailed("merge failed".to_string()))
    }
}

// Engine collaborators

/// Capture service with scripted outcomes
#[derive(Default)]
pub struct FakeCaptureService {
    pub start_error: Mutex<Option<ScreencapError>>,
    pub pause_error: Mutex<Option<ScreencapError>>,
    pub stop_result: Mutex<Option<Result<PathBuf>>>,
    pub recover_result: Mutex<Option<PathBuf>>,
    pub output_location: Mutex<Option<PathBuf>>,
    pub handlers: Mutex<Option<SessionHandlers>>,
    pub outputs: Mutex<Vec<PathBuf>>,
    pub configurations: Mutex<Vec<StreamConfiguration>>,
    pub options: Mutex<Vec<RecordingOptions>>,

    pub start_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub discard_calls: AtomicUsize,
    pub recover_calls: AtomicUsize,

    /// Hold pauses until notified, to observe re-entrancy
    pub pause_release: tokio::sync::Notify,
    pub hold_pauses: AtomicBool,

    /// Hold starts until notified, to cancel mid-start
    pub start_release: tokio::sync::Notify,
    pub hold_starts: AtomicBool,
}

impl FakeCaptureService {
    pub fn calls(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureService for FakeCaptureService {
    async fn start_recording(
        &self,
        _filter: &ContentFilter,
        configuration: &StreamConfiguration,
        output: PathBuf,
        options: RecordingOptions,
        handlers: SessionHandlers,
    ) -> Result<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.outputs.lock().push(output);
        self.configurations.lock().push(configuration.clone());
        self.options.lock().push(options);
        *self.handlers.lock() = Some(handlers);
        if self.hold_starts.load(Ordering::SeqCst) {
            self.start_release.notified().await;
        }
        match self.start_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn pause_recording(&self) -> Result<()> {
        self.pause_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_pauses.load(Ordering::SeqCst) {
            self.pause_release.notified().await;
        }
        match self.pause_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn resume_recording(&self) -> Result<()> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_recording(&self) -> Result<PathBuf> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        match self.stop_result.lock().take() {
            Some(result) => result,
            None => self
                .outputs
                .lock()
                .last()
                .cloned()
                .ok_or_else(|| ScreencapError::NotPossible("idle".to_string())),
        }
    }

    async fn discard_recording(&self) {
        self.discard_calls.fetch_add(1, Ordering::SeqCst);
    }

    async fn recover_partial_recording(&self) -> Option<PathBuf> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);
        self.recover_result.lock().clone()
    }

    fn output_location(&self) -> Option<PathBuf> {
        self.output_location.lock().clone()
    }
}

pub struct FakePermissions {
    pub screen: AtomicBool,
    pub camera: AtomicBool,
    pub microphone: AtomicBool,
}

impl Default for FakePermissions {
    fn default() -> Self {
        Self {
            screen: AtomicBool::new(true),
            camera: AtomicBool::new(true),
            microphone: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PermissionService for FakePermissions {
    fn ensure_screen_recording_access(&self) -> bool {
        self.screen.load(Ordering::SeqCst)
    }

    async fn request_camera_access(&self) -> bool {
        self.camera.load(Ordering::SeqCst)
    }

    async fn request_microphone_access(&self) -> bool {
        self.microphone.load(Ordering::SeqCst)
    }
}

pub struct FakeSelector {
    pub filter: Mutex<Option<ContentFilter>>,
    pub sources: Mutex<Vec<CaptureSource>>,
    pub cancel_calls: AtomicUsize,
}

impl Default for FakeSelector {
    fn default() -> Self {
        Self {
            filter: Mutex::new(Some(ContentFilter::Display { index: 0 })),
            sources: Mutex::new(Vec::new()),
            cancel_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ContentSelector for FakeSelector {
    async fn select_content(&self, source: CaptureSource) -> Result<Option<ContentFilter>> {
        self.sources.lock().push(source);
        Ok(self.filter.lock().clone())
    }

    async fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeDirectory {
    pub directory: PathBuf,
    pub stop_accessing_calls: AtomicUsize,
}

impl FakeDirectory {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            stop_accessing_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl OutputDirectoryProvider for FakeDirectory {
    async fn recordings_directory(&self) -> Result<PathBuf> {
        Ok(self.directory.clone())
    }

    fn stop_accessing(&self) {
        self.stop_accessing_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingObserverSpy {
    pub states: Mutex<Vec<RecordingState>>,
    pub finished: Mutex<Vec<Recording>>,
    pub errors: Mutex<Vec<ScreencapError>>,
}

impl RecordingObserver for RecordingObserverSpy {
    fn on_state_changed(&self, state: &RecordingState) {
        self.states.lock().push(state.clone());
    }

    fn on_finished(&self, recording: &Recording) {
        self.finished.lock().push(recording.clone());
    }

    fn on_error(&self, error: &ScreencapError) {
        self.errors.lock().push(error.clone());
    }
}

/// Clock the test moves by hand
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            )),
        }
    }

    pub fn advance(&self, seconds: i64) {
        let mut now = self.now.lock();
        *now = *now + ChronoDuration::seconds(seconds);
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock())
    }
}

/// Poll `condition` until it holds or a second has passed
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
