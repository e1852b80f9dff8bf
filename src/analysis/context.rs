//! Immutable detection context shared by every stage of the pipeline.

use crate::config::DetectionConfig;
use crate::error::ConfigError;

/// Highest accepted capture rate in Hz
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Highest accepted tempo bound
pub const MAX_BPM: f32 = 1000.0;

/// Longest accepted analysis window in seconds
pub const MAX_WINDOW_DURATION_SECS: f32 = 120.0;

/// Validated sample rate, tempo bounds and analysis window duration
///
/// Constructed once per coordinator; invalid combinations are rejected here
/// so nothing downstream has to re-check them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionContext {
    sample_rate: u32,
    min_bpm: f32,
    max_bpm: f32,
    window_duration_secs: f32,
}

impl DetectionContext {
    pub fn new(
        sample_rate: u32,
        min_bpm: f32,
        max_bpm: f32,
        window_duration_secs: f32,
    ) -> Result<Self, ConfigError> {
        if sample_rate == 0 || sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::InvalidSampleRate { sample_rate });
        }
        if !(min_bpm.is_finite() && min_bpm > 0.0 && min_bpm < max_bpm && max_bpm <= MAX_BPM) {
            return Err(ConfigError::InvalidBpmRange { min_bpm, max_bpm });
        }
        if !(window_duration_secs.is_finite()
            && window_duration_secs > 0.0
            && window_duration_secs <= MAX_WINDOW_DURATION_SECS)
        {
            return Err(ConfigError::InvalidWindowDuration {
                seconds: window_duration_secs,
            });
        }
        let context = Self {
            sample_rate,
            min_bpm,
            max_bpm,
            window_duration_secs,
        };
        if context.window_len() == 0 {
            return Err(ConfigError::InvalidWindowDuration {
                seconds: window_duration_secs,
            });
        }
        Ok(context)
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self, ConfigError> {
        Self::new(
            config.sample_rate,
            config.min_bpm,
            config.max_bpm,
            config.window_duration_secs,
        )
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn min_bpm(&self) -> f32 {
        self.min_bpm
    }

    pub fn max_bpm(&self) -> f32 {
        self.max_bpm
    }

    pub fn window_duration_secs(&self) -> f32 {
        self.window_duration_secs
    }

    /// Samples per analysis window: `sample_rate * window_duration`
    pub fn window_len(&self) -> usize {
        self.seconds_to_samples(self.window_duration_secs)
    }

    pub fn seconds_to_samples(&self, seconds: f32) -> usize {
        (self.sample_rate as f64 * seconds as f64).round() as usize
    }

    pub fn contains(&self, bpm: f32) -> bool {
        bpm >= self.min_bpm && bpm <= self.max_bpm
    }

    pub fn clamp_bpm(&self, bpm: f32) -> f32 {
        bpm.clamp(self.min_bpm, self.max_bpm)
    }

    pub fn mid_bpm(&self) -> f32 {
        (self.min_bpm + self.max_bpm) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_len_matches_duration() {
        let context = DetectionContext::new(44100, 60.0, 200.0, 6.0).unwrap();
        assert_eq!(context.window_len(), 264_600);
        assert_eq!(context.seconds_to_samples(4.0), 176_400);
    }

    #[test]
    fn test_rejects_zero_sample_rate() {
        assert_eq!(
            DetectionContext::new(0, 60.0, 200.0, 6.0),
            Err(ConfigError::InvalidSampleRate { sample_rate: 0 })
        );
    }

    #[test]
    fn test_rejects_inverted_or_equal_bpm_range() {
        assert!(DetectionContext::new(44100, 200.0, 60.0, 6.0).is_err());
        assert!(DetectionContext::new(44100, 120.0, 120.0, 6.0).is_err());
        assert!(DetectionContext::new(44100, 0.0, 120.0, 6.0).is_err());
        assert!(DetectionContext::new(44100, -10.0, 120.0, 6.0).is_err());
    }

    #[test]
    fn test_rejects_non_positive_window() {
        assert!(DetectionContext::new(44100, 60.0, 200.0, 0.0).is_err());
        assert!(DetectionContext::new(44100, 60.0, 200.0, -1.0).is_err());
        assert!(DetectionContext::new(44100, 60.0, 200.0, f32::NAN).is_err());
    }

    #[test]
    fn test_rejects_oversized_parameters() {
        assert!(DetectionContext::new(MAX_SAMPLE_RATE + 1, 60.0, 200.0, 6.0).is_err());
        assert!(DetectionContext::new(44100, 60.0, 5000.0, 6.0).is_err());
        assert!(DetectionContext::new(44100, 60.0, f32::INFINITY, 6.0).is_err());
        assert_eq!(
            DetectionContext::new(44100, 60.0, 200.0, 1e12),
            Err(ConfigError::InvalidWindowDuration { seconds: 1e12 })
        );
        assert!(
            DetectionContext::new(MAX_SAMPLE_RATE, 60.0, MAX_BPM, MAX_WINDOW_DURATION_SECS).is_ok()
        );
    }

    #[test]
    fn test_clamp_and_contains() {
        let context = DetectionContext::new(48000, 60.0, 200.0, 4.0).unwrap();
        assert!(context.contains(60.0));
        assert!(context.contains(200.0));
        assert!(!context.contains(201.0));
        assert_eq!(context.clamp_bpm(250.0), 200.0);
        assert_eq!(context.clamp_bpm(30.0), 60.0);
    }
}
