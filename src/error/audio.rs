// Audio source and session error types

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes attached to [`AudioError`].
///
/// Error code range: 1001-1008
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Capture device missing or could not be opened
    pub const DEVICE_UNAVAILABLE: i32 = 1001;

    /// Microphone permission denied by the platform
    pub const PERMISSION_DENIED: i32 = 1002;

    /// Sample stream failed or disconnected mid-session
    pub const STREAM_FAILURE: i32 = 1003;

    /// Detection session already running
    pub const ALREADY_RUNNING: i32 = 1004;

    /// Detection session not running
    pub const NOT_RUNNING: i32 = 1005;

    /// Source sample rate differs from the configured detection context
    pub const SAMPLE_RATE_MISMATCH: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// No tokio runtime available to host the session tasks
    pub const RUNTIME_UNAVAILABLE: i32 = 1008;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=DetectorCoordinator, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// These cover the audio source collaborator and the session lifecycle of
/// the coordinator. Source failures are fatal for the current session.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Capture device missing or could not be opened
    DeviceUnavailable { details: String },

    /// Microphone permission denied
    PermissionDenied,

    /// Sample stream failed after it was started
    StreamFailure { reason: String },

    /// Session already running
    AlreadyRunning,

    /// Session not running
    NotRunning,

    /// Source delivers a different sample rate than the detection context
    SampleRateMismatch { expected: u32, actual: u32 },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Called outside of a tokio runtime
    RuntimeUnavailable,
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
            AudioError::PermissionDenied => AudioErrorCodes::PERMISSION_DENIED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::AlreadyRunning => AudioErrorCodes::ALREADY_RUNNING,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::SampleRateMismatch { .. } => AudioErrorCodes::SAMPLE_RATE_MISMATCH,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::RuntimeUnavailable => AudioErrorCodes::RUNTIME_UNAVAILABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::DeviceUnavailable { details } => {
                format!("Audio device unavailable: {}", details)
            }
            AudioError::PermissionDenied => {
                "Microphone permission denied. Please grant microphone access.".to_string()
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::AlreadyRunning => {
                "Detection already running. Call stop() first.".to_string()
            }
            AudioError::NotRunning => "Detection not running. Call start() first.".to_string(),
            AudioError::SampleRateMismatch { expected, actual } => {
                format!(
                    "Source sample rate {} Hz does not match detection context {} Hz",
                    actual, expected
                )
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::RuntimeUnavailable => {
                "No tokio runtime available; start() must run inside a runtime".to_string()
            }
        }
    }
}

impl AudioError {
    /// Whether this error ends the current session (moves the coordinator to `Error`).
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            AudioError::DeviceUnavailable { .. }
                | AudioError::PermissionDenied
                | AudioError::StreamFailure { .. }
        )
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::DeviceUnavailable {
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::DeviceUnavailable {
                details: "test".to_string()
            }
            .code(),
            AudioErrorCodes::DEVICE_UNAVAILABLE
        );
        assert_eq!(
            AudioError::PermissionDenied.code(),
            AudioErrorCodes::PERMISSION_DENIED
        );
        assert_eq!(
            AudioError::StreamFailure {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::STREAM_FAILURE
        );
        assert_eq!(
            AudioError::AlreadyRunning.code(),
            AudioErrorCodes::ALREADY_RUNNING
        );
        assert_eq!(AudioError::NotRunning.code(), AudioErrorCodes::NOT_RUNNING);
        assert_eq!(
            AudioError::SampleRateMismatch {
                expected: 44100,
                actual: 48000
            }
            .code(),
            AudioErrorCodes::SAMPLE_RATE_MISMATCH
        );
        assert_eq!(
            AudioError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            1007
        );
        assert_eq!(AudioError::RuntimeUnavailable.code(), 1008);
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::SampleRateMismatch {
            expected: 44100,
            actual: 48000,
        };
        assert!(err.message().contains("48000"));
        assert!(err.message().contains("44100"));

        let err = AudioError::AlreadyRunning;
        assert!(err.message().contains("already running"));

        let err = AudioError::PermissionDenied;
        assert!(err.message().contains("permission denied"));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(AudioError::PermissionDenied.is_fatal_for_session());
        assert!(AudioError::StreamFailure {
            reason: "gone".to_string()
        }
        .is_fatal_for_session());
        assert!(!AudioError::AlreadyRunning.is_fatal_for_session());
        assert!(!AudioError::NotRunning.is_fatal_for_session());
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NotRunning;
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("device busy");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::DeviceUnavailable { details } => {
                assert!(details.contains("device busy"));
            }
            _ => panic!("Expected DeviceUnavailable"),
        }
    }
}
