//! Seams between the recording engine and the outside world

use async_trait::async_trait;
use std::path::PathBuf;

use super::state::RecordingState;
use crate::capture::{CaptureSource, ContentFilter, StreamConfiguration};
use crate::session::{RecordingOptions, SessionController, SessionHandlers};
use crate::storage::Recording;
use crate::{Result, ScreencapError};

/// Session operations the engine drives
#[async_trait]
pub trait CaptureService: Send + Sync {
    async fn start_recording(
        &self,
        filter: &ContentFilter,
        configuration: &StreamConfiguration,
        output: PathBuf,
        options: RecordingOptions,
        handlers: SessionHandlers,
    ) -> Result<()>;

    async fn pause_recording(&self) -> Result<()>;

    fn resume_recording(&self) -> Result<()>;

    async fn stop_recording(&self) -> Result<PathBuf>;

    async fn discard_recording(&self);

    async fn recover_partial_recording(&self) -> Option<PathBuf>;

    /// Final output path of the current session, once its format is known
    fn output_location(&self) -> Option<PathBuf>;
}

#[async_trait]
impl CaptureService for SessionController {
    async fn start_recording(
        &self,
        filter: &ContentFilter,
        configuration: &StreamConfiguration,
        output: PathBuf,
        options: RecordingOptions,
        handlers: SessionHandlers,
    ) -> Result<()> {
        self.start(filter, configuration, output, options, handlers)
            .await
    }

    async fn pause_recording(&self) -> Result<()> {
        self.pause().await
    }

    fn resume_recording(&self) -> Result<()> {
        self.resume()
    }

    async fn stop_recording(&self) -> Result<PathBuf> {
        self.stop().await
    }

    async fn discard_recording(&self) {
        self.discard().await
    }

    async fn recover_partial_recording(&self) -> Option<PathBuf> {
        SessionController::recover_partial_recording(self).await
    }

    fn output_location(&self) -> Option<PathBuf> {
        self.base_output()
    }
}

/// OS permission checks
#[async_trait]
pub trait PermissionService: Send + Sync {
    fn ensure_screen_recording_access(&self) -> bool;

    async fn request_camera_access(&self) -> bool;

    async fn request_microphone_access(&self) -> bool;
}

/// Lets the user pick what to capture
#[async_trait]
pub trait ContentSelector: Send + Sync {
    /// `None` when the user picked nothing or the picker was cancelled
    async fn select_content(&self, source: CaptureSource) -> Result<Option<ContentFilter>>;

    async fn cancel(&self);
}

/// Where recordings are written
#[async_trait]
pub trait OutputDirectoryProvider: Send + Sync {
    async fn recordings_directory(&self) -> Result<PathBuf>;

    /// Release any access acquired by `recordings_directory`
    fn stop_accessing(&self);
}

/// Receives engine notifications. Called without any engine lock held.
pub trait RecordingObserver: Send + Sync {
    fn on_state_changed(&self, state: &RecordingState);

    fn on_finished(&self, recording: &Recording);

    fn on_error(&self, error: &ScreencapError);
}
