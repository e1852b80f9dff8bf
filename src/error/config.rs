// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Error code range: 2001-2008
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// Sample rate must be in `[1, MAX_SAMPLE_RATE]`
    pub const INVALID_SAMPLE_RATE: i32 = 2001;

    /// BPM bounds must satisfy 0 < min < max <= MAX_BPM
    pub const INVALID_BPM_RANGE: i32 = 2002;

    /// Window duration must be finite and in `(0, MAX_WINDOW_DURATION_SECS]`
    pub const INVALID_WINDOW_DURATION: i32 = 2003;

    /// Hop duration must be positive and no longer than the window
    pub const INVALID_HOP_DURATION: i32 = 2004;

    /// Consensus tuning parameter out of range
    pub const INVALID_TUNING: i32 = 2005;

    /// No tempo algorithm enabled
    pub const NO_ALGORITHMS: i32 = 2006;

    /// Algorithm-specific parameter out of range
    pub const INVALID_ALGORITHM_PARAMETER: i32 = 2007;

    /// Same algorithm listed more than once
    pub const DUPLICATE_ALGORITHM: i32 = 2008;
}

/// Log a configuration error with structured context
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=AppConfig, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration errors
///
/// Raised while constructing a detection context, a consensus engine or a
/// coordinator. Invalid configuration never reaches a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidSampleRate { sample_rate: u32 },

    InvalidBpmRange { min_bpm: f32, max_bpm: f32 },

    InvalidWindowDuration { seconds: f32 },

    InvalidHopDuration { hop_secs: f32, window_secs: f32 },

    /// A consensus tuning parameter is out of its valid range
    InvalidTuning { parameter: &'static str, reason: String },

    NoAlgorithms,

    InvalidAlgorithmParameter {
        algorithm: &'static str,
        parameter: &'static str,
        reason: String,
    },

    DuplicateAlgorithm { algorithm: String },
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::InvalidSampleRate { .. } => ConfigErrorCodes::INVALID_SAMPLE_RATE,
            ConfigError::InvalidBpmRange { .. } => ConfigErrorCodes::INVALID_BPM_RANGE,
            ConfigError::InvalidWindowDuration { .. } => {
                ConfigErrorCodes::INVALID_WINDOW_DURATION
            }
            ConfigError::InvalidHopDuration { .. } => ConfigErrorCodes::INVALID_HOP_DURATION,
            ConfigError::InvalidTuning { .. } => ConfigErrorCodes::INVALID_TUNING,
            ConfigError::NoAlgorithms => ConfigErrorCodes::NO_ALGORITHMS,
            ConfigError::InvalidAlgorithmParameter { .. } => {
                ConfigErrorCodes::INVALID_ALGORITHM_PARAMETER
            }
            ConfigError::DuplicateAlgorithm { .. } => ConfigErrorCodes::DUPLICATE_ALGORITHM,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::InvalidSampleRate { sample_rate } => {
                format!("Sample rate must be in [1, 384000] Hz (got {})", sample_rate)
            }
            ConfigError::InvalidBpmRange { min_bpm, max_bpm } => {
                format!(
                    "BPM range must satisfy 0 < min < max <= 1000 (got min {}, max {})",
                    min_bpm, max_bpm
                )
            }
            ConfigError::InvalidWindowDuration { seconds } => {
                format!("Window duration must be in (0, 120] seconds (got {}s)", seconds)
            }
            ConfigError::InvalidHopDuration {
                hop_secs,
                window_secs,
            } => format!(
                "Hop duration must be in (0, window] (got hop {}s, window {}s)",
                hop_secs, window_secs
            ),
            ConfigError::InvalidTuning { parameter, reason } => {
                format!("Invalid consensus parameter {}: {}", parameter, reason)
            }
            ConfigError::NoAlgorithms => "At least one tempo algorithm must be enabled".to_string(),
            ConfigError::InvalidAlgorithmParameter {
                algorithm,
                parameter,
                reason,
            } => format!("Invalid {} parameter {}: {}", algorithm, parameter, reason),
            ConfigError::DuplicateAlgorithm { algorithm } => {
                format!("Algorithm {} is enabled more than once", algorithm)
            }
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ConfigError {}
