//! Recording engine
//!
//! Sits on top of the session controller: checks permissions, asks the user
//! what to capture, runs the countdown, keeps the elapsed-time clock net of
//! pauses, and turns the outcome of a session into a persisted [`Recording`].

mod clock;
mod collaborators;
mod state;

pub use clock::format_clock;
pub use collaborators::{
    CaptureService, ContentSelector, OutputDirectoryProvider, PermissionService,
    RecordingObserver,
};
pub use state::RecordingState;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureSource, ContentFilter, StreamConfiguration};
use crate::config::{RecordingSettings, SettingsRepository};
use crate::session::{RecordingOptions, SessionHandlers};
use crate::storage::{Recording, RecordingStore};
use crate::{Permission, Result, ScreencapError, APP_NAME};

/// Source of the current time
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Collaborators injected into the engine
#[derive(Clone)]
pub struct EngineServices {
    pub capture: Arc<dyn CaptureService>,
    pub permissions: Arc<dyn PermissionService>,
    pub selector: Arc<dyn ContentSelector>,
    pub directory: Arc<dyn OutputDirectoryProvider>,
    pub store: Arc<dyn RecordingStore>,
    pub observer: Arc<dyn RecordingObserver>,
}

struct EngineState {
    state: RecordingState,
    settings: RecordingSettings,
    capture_source: CaptureSource,

    /// Cancels the start flow (selection and countdown)
    flow: Option<CancellationToken>,
    flow_id: u64,

    current_output: Option<PathBuf>,
    started_at: Option<DateTime<Utc>>,
    paused_duration: chrono::Duration,
    /// Set while paused
    last_pause_at: Option<DateTime<Utc>>,
    transitioning: bool,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            state: RecordingState::Idle,
            settings: RecordingSettings::default(),
            capture_source: CaptureSource::default(),
            flow: None,
            flow_id: 0,
            current_output: None,
            started_at: None,
            paused_duration: chrono::Duration::zero(),
            last_pause_at: None,
            transitioning: false,
        }
    }
}

struct EngineInner {
    services: EngineServices,
    settings_repository: Option<Arc<dyn SettingsRepository>>,
    clock: Clock,
    state: Mutex<EngineState>,
}

/// Drives recordings from intent to persisted result
#[derive(Clone)]
pub struct RecordingEngine {
    inner: Arc<EngineInner>,
}

impl RecordingEngine {
    pub fn new(services: EngineServices, settings: RecordingSettings) -> Self {
        Self::with_clock(services, settings, Arc::new(Utc::now))
    }

    pub fn with_clock(services: EngineServices, settings: RecordingSettings, clock: Clock) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                services,
                settings_repository: None,
                clock,
                state: Mutex::new(EngineState {
                    settings,
                    ..EngineState::default()
                }),
            }),
        }
    }

    /// Build an engine whose settings are loaded from and saved to `repository`
    pub fn with_repository(
        services: EngineServices,
        repository: Arc<dyn SettingsRepository>,
    ) -> Self {
        let settings = repository.load();
        Self {
            inner: Arc::new(EngineInner {
                services,
                settings_repository: Some(repository),
                clock: Arc::new(Utc::now),
                state: Mutex::new(EngineState {
                    settings,
                    ..EngineState::default()
                }),
            }),
        }
    }

    fn from_weak(inner: &Weak<EngineInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    pub fn state(&self) -> RecordingState {
        self.inner.state.lock().state.clone()
    }

    pub fn settings(&self) -> RecordingSettings {
        self.inner.state.lock().settings.clone()
    }

    pub fn capture_source(&self) -> CaptureSource {
        self.inner.state.lock().capture_source
    }

    pub fn set_capture_source(&self, source: CaptureSource) {
        self.inner.state.lock().capture_source = source;
    }

    /// Replace the settings and persist them
    pub fn update_settings(&self, settings: RecordingSettings) {
        self.inner.state.lock().settings = settings.clone();
        if let Some(repository) = &self.inner.settings_repository {
            if let Err(e) = repository.save(&settings) {
                warn!("Failed to save settings: {}", e);
            }
        }
    }

    pub fn current_recording_start(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().started_at
    }

    /// Recorded time so far, paused spans excluded
    pub fn recording_duration(&self) -> Duration {
        let st = self.inner.state.lock();
        match st.started_at {
            Some(started_at) => effective_duration(&st, started_at, self.now()),
            None => Duration::ZERO,
        }
    }

    /// [`recording_duration`](Self::recording_duration) as `MM:SS`
    pub fn recording_clock(&self) -> String {
        format_clock(self.recording_duration())
    }

    fn set_state(&self, state: RecordingState) {
        {
            let mut st = self.inner.state.lock();
            if st.state == state {
                return;
            }
            st.state = state.clone();
        }
        debug!("Engine state: {}", state);
        self.inner.services.observer.on_state_changed(&state);
    }

    /// Start if idle, stop if recording
    pub async fn start_or_stop(&self) {
        let state = self.state();
        match state {
            RecordingState::Idle | RecordingState::Error(_) => self.start().await,
            RecordingState::Recording { .. } => self.stop().await,
            _ => debug!("start_or_stop ignored while {}", state),
        }
    }

    /// Run the start flow: permissions, selection, countdown, capture.
    ///
    /// Returns once recording has started or the flow ended without it.
    pub async fn start(&self) {
        let (token, flow_id) = {
            let mut st = self.inner.state.lock();
            if !st.state.can_start() || st.flow.is_some() {
                debug!("start ignored while {}", st.state);
                return;
            }
            let token = CancellationToken::new();
            st.flow = Some(token.clone());
            st.flow_id += 1;
            (token, st.flow_id)
        };

        self.set_state(RecordingState::Idle);
        self.run_start_flow(&token).await;

        let mut st = self.inner.state.lock();
        if st.flow_id == flow_id {
            st.flow = None;
        }
    }

    async fn run_start_flow(&self, token: &CancellationToken) {
        if let Err(e) = self.ensure_permissions().await {
            self.report_error(&e);
            return;
        }

        self.set_state(RecordingState::PickingSource);
        let source = self.capture_source();
        let filter = match self.inner.services.selector.select_content(source).await {
            Ok(Some(filter)) => filter,
            Ok(None) => {
                info!("Nothing selected");
                if self.state() == RecordingState::PickingSource {
                    self.set_state(RecordingState::Idle);
                }
                return;
            }
            Err(e) => {
                self.report_error(&e);
                return;
            }
        };

        if token.is_cancelled() || self.state() != RecordingState::PickingSource {
            debug!("Selection finished after cancel");
            return;
        }

        let total = self.settings().countdown_seconds;
        for remaining in (1..=total).rev() {
            if token.is_cancelled() {
                return;
            }
            self.set_state(RecordingState::Countdown(remaining));
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }

        self.begin_recording(&filter, token).await;
    }

    async fn begin_recording(&self, filter: &ContentFilter, token: &CancellationToken) {
        if token.is_cancelled() {
            return;
        }

        match self.try_begin_recording(filter).await {
            Ok(()) if token.is_cancelled() => {
                info!("Cancelled while capture was starting, discarding");
                self.inner.services.capture.discard_recording().await;
                self.inner.services.directory.stop_accessing();
                self.set_state(RecordingState::Idle);
            }
            Ok(()) => {
                {
                    let mut st = self.inner.state.lock();
                    st.started_at = Some(self.now());
                    st.paused_duration = chrono::Duration::zero();
                    st.last_pause_at = None;
                    st.transitioning = false;
                }
                info!("Recording started");
                self.set_state(RecordingState::Recording { is_paused: false });
            }
            Err(e) if token.is_cancelled() => {
                info!("Cancelled while capture was starting ({})", e);
                self.inner.state.lock().transitioning = false;
                self.inner.services.directory.stop_accessing();
                self.set_state(RecordingState::Idle);
            }
            Err(e) => self.report_error(&e),
        }
    }

    async fn try_begin_recording(&self, filter: &ContentFilter) -> Result<()> {
        self.ensure_permissions().await?;

        let settings = self.settings();
        let directory = self.inner.services.directory.recordings_directory().await?;
        let output = output_path(
            &directory,
            self.now(),
            settings.output_format.file_type().extension(),
        );
        self.inner.state.lock().current_output = Some(output.clone());

        let configuration = stream_configuration(&settings);
        let options = RecordingOptions {
            preferred_file_type: Some(settings.output_format.file_type()),
            preferred_codec: Some(settings.quality.video_codec()),
        };

        let weak = Arc::downgrade(&self.inner);
        let handlers = SessionHandlers::new(move |error| {
            if let Some(engine) = RecordingEngine::from_weak(&weak) {
                engine.report_error(&error);
            }
        });

        info!("Recording to {}", output.display());
        self.inner
            .services
            .capture
            .start_recording(filter, &configuration, output, options, handlers)
            .await
    }

    async fn ensure_permissions(&self) -> Result<()> {
        let permissions = &self.inner.services.permissions;
        if !permissions.ensure_screen_recording_access() {
            return Err(ScreencapError::PermissionDenied(Permission::ScreenRecording));
        }

        let settings = self.settings();
        if settings.camera_enabled && !permissions.request_camera_access().await {
            return Err(ScreencapError::PermissionDenied(Permission::Camera));
        }
        if settings.microphone_enabled && !permissions.request_microphone_access().await {
            return Err(ScreencapError::PermissionDenied(Permission::Microphone));
        }
        Ok(())
    }

    /// Toggle pause; ignored while a toggle is already underway
    pub async fn pause_resume(&self) {
        let is_paused = {
            let mut st = self.inner.state.lock();
            let RecordingState::Recording { is_paused } = st.state else {
                return;
            };
            if st.transitioning {
                debug!("pause_resume ignored, transition underway");
                return;
            }
            st.transitioning = true;
            is_paused
        };

        if is_paused {
            self.resume();
        } else {
            self.pause().await;
        }
    }

    async fn pause(&self) {
        let result = self.inner.services.capture.pause_recording().await;
        self.inner.state.lock().transitioning = false;

        match result {
            Ok(()) => {
                {
                    let mut st = self.inner.state.lock();
                    if st.state != (RecordingState::Recording { is_paused: false }) {
                        return;
                    }
                    st.last_pause_at = Some(self.now());
                }
                info!("Recording paused at {}", self.recording_clock());
                self.set_state(RecordingState::Recording { is_paused: true });
            }
            Err(e) => self.report_error(&e),
        }
    }

    fn resume(&self) {
        let result = self.inner.services.capture.resume_recording();
        self.inner.state.lock().transitioning = false;

        match result {
            Ok(()) => {
                {
                    let now = self.now();
                    let mut st = self.inner.state.lock();
                    if let Some(paused_at) = st.last_pause_at.take() {
                        st.paused_duration = st.paused_duration + (now - paused_at);
                    }
                }
                info!("Recording resumed");
                self.set_state(RecordingState::Recording { is_paused: false });
            }
            Err(e) => self.report_error(&e),
        }
    }

    /// Stop and keep the recording
    pub async fn stop(&self) {
        self.stop_recording(false).await;
    }

    /// Abort whatever the start flow or the recording is doing
    pub async fn cancel(&self) {
        let state = self.state();
        match state {
            RecordingState::Countdown(_) => {
                info!("Countdown cancelled");
                if let Some(token) = self.inner.state.lock().flow.take() {
                    token.cancel();
                }
                self.set_state(RecordingState::Idle);
            }
            RecordingState::PickingSource => {
                info!("Source selection cancelled");
                if let Some(token) = self.inner.state.lock().flow.take() {
                    token.cancel();
                }
                self.inner.services.selector.cancel().await;
                self.set_state(RecordingState::Idle);
            }
            RecordingState::Recording { .. } => self.stop_recording(true).await,
            _ => debug!("cancel ignored while {}", state),
        }
    }

    async fn stop_recording(&self, discard: bool) {
        {
            let mut st = self.inner.state.lock();
            if !st.state.is_recording() {
                debug!("stop ignored while {}", st.state);
                return;
            }
            st.transitioning = false;
        }
        self.set_state(RecordingState::Stopping);

        let capture = &self.inner.services.capture;
        if discard {
            capture.discard_recording().await;
            info!("Recording discarded");
            self.reset_timing();
            self.set_state(RecordingState::Idle);
        } else {
            match capture.stop_recording().await {
                Ok(path) => self.finish_recording(path),
                Err(e) => self.salvage(e).await,
            }
        }

        self.inner.services.directory.stop_accessing();
    }

    async fn salvage(&self, error: ScreencapError) {
        warn!("Stop failed: {}", error);

        if error == ScreencapError::ConnectionInterrupted {
            let requested = self.inner.state.lock().current_output.clone();
            let written = [self.inner.services.capture.output_location(), requested]
                .into_iter()
                .flatten()
                .find(|path| file_size(path) > 0);
            if let Some(path) = written {
                info!("Keeping output written before the connection dropped");
                self.finish_recording(path);
                return;
            }
        }

        match self.inner.services.capture.recover_partial_recording().await {
            Some(path) => self.finish_recording(path),
            None => self.report_error(&error),
        }
    }

    fn finish_recording(&self, path: PathBuf) {
        let recording = {
            let now = self.now();
            let st = self.inner.state.lock();
            let created_at = st.started_at.unwrap_or(now);
            let duration = effective_duration(&st, created_at, now);
            Recording::new(path, created_at, duration.as_secs_f64(), st.capture_source)
        };

        if let Err(e) = self.inner.services.store.add(recording.clone()) {
            warn!("Failed to save recents: {}", e);
        }
        info!(
            "Saved {} ({})",
            recording.path.display(),
            format_clock(Duration::from_secs_f64(recording.duration_secs))
        );

        self.inner.services.observer.on_finished(&recording);
        self.reset_timing();
        self.set_state(RecordingState::Idle);
    }

    fn reset_timing(&self) {
        let mut st = self.inner.state.lock();
        st.started_at = None;
        st.paused_duration = chrono::Duration::zero();
        st.last_pause_at = None;
        st.current_output = None;
    }

    fn report_error(&self, error: &ScreencapError) {
        error!("Recording failed: {}", error);
        {
            let mut st = self.inner.state.lock();
            st.transitioning = false;
            st.last_pause_at = None;
        }
        self.set_state(RecordingState::Error(error.to_string()));
        self.inner.services.directory.stop_accessing();
        self.inner.services.observer.on_error(error);
    }
}

/// `(now - start) - paused`, minus the current pause if one is open
fn effective_duration(st: &EngineState, since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let mut elapsed = now - since - st.paused_duration;
    if let Some(paused_at) = st.last_pause_at {
        elapsed = elapsed - (now - paused_at);
    }
    clock::non_negative(elapsed)
}

/// Stream configuration for the given settings
pub fn stream_configuration(settings: &RecordingSettings) -> StreamConfiguration {
    let mut configuration = StreamConfiguration {
        shows_cursor: true,
        queue_depth: 5,
        excludes_current_process_audio: true,
        ..StreamConfiguration::default()
    };

    if settings.system_audio_enabled {
        configuration.captures_audio = true;
        configuration.sample_rate = 48_000;
        configuration.channel_count = 2;
    }
    if settings.microphone_enabled {
        configuration.captures_microphone = true;
        configuration.microphone_device = None;
    }
    configuration
}

/// `<dir>/Screencap_<UTC timestamp>.<ext>`, colons replaced so the name is
/// portable
pub fn output_path(directory: &Path, now: DateTime<Utc>, extension: &str) -> PathBuf {
    let timestamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace(':', "-");
    let prefix = {
        let mut chars = APP_NAME.chars();
        chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect::<String>())
            .unwrap_or_default()
    };
    directory.join(format!("{}_{}.{}", prefix, timestamp, extension))
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}
