//! Engine-level recording state

use std::fmt;

/// What the engine is doing, as shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    /// Waiting for the user to choose what to capture
    PickingSource,
    /// Seconds left before capture starts
    Countdown(u32),
    Recording {
        is_paused: bool,
    },
    Stopping,
    Error(String),
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Recording { is_paused: true })
    }

    /// Whether a new recording may be started
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Error(_))
    }

    /// Whether `cancel` does anything in this state
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Countdown(_) | Self::PickingSource | Self::Recording { .. }
        )
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::PickingSource => f.write_str("picking source"),
            Self::Countdown(remaining) => write!(f, "countdown ({})", remaining),
            Self::Recording { is_paused: false } => f.write_str("recording"),
            Self::Recording { is_paused: true } => f.write_str("paused"),
            Self::Stopping => f.write_str("stopping"),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_allowed_only_from_idle_or_error() {
        assert!(RecordingState::Idle.can_start());
        assert!(RecordingState::Error("boom".into()).can_start());
        assert!(!RecordingState::Countdown(2).can_start());
        assert!(!RecordingState::Recording { is_paused: true }.can_start());
    }

    #[test]
    fn stopping_is_not_cancellable() {
        assert!(RecordingState::PickingSource.is_cancellable());
        assert!(!RecordingState::Stopping.is_cancellable());
        assert!(!RecordingState::Idle.is_cancellable());
    }
}
