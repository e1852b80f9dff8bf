// Error types for the tempo consensus engine
//
// This module defines custom error types for audio source and configuration
// failures, providing structured error handling with stable numeric codes
// that a host application can map onto its own error surface.

mod audio;
mod config;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use config::{log_config_error, ConfigError, ConfigErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the crate boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
