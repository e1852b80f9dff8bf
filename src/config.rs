//! Configuration management for the tempo consensus pipeline
//!
//! Every tunable of the detector is supplied here at construction time and
//! is immutable for the lifetime of a coordinator. Configuration can be
//! loaded from a JSON file for fast experimentation without recompilation;
//! [`AppConfig::validate`] rejects invalid combinations before any session
//! starts.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use crate::analysis::AlgorithmKind;
use crate::error::ConfigError;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub consensus: ConsensusConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub algorithms: AlgorithmsConfig,
}

/// Raw detection context parameters (validated into `DetectionContext`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Sample rate of the incoming stream in Hz
    pub sample_rate: u32,
    /// Lowest tempo any algorithm may report
    pub min_bpm: f32,
    /// Highest tempo any algorithm may report
    pub max_bpm: f32,
    /// Length of one analysis window in seconds
    pub window_duration_secs: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            min_bpm: 60.0,
            max_bpm: 200.0,
            window_duration_secs: 6.0,
        }
    }
}

/// Which fusion policy the coordinator runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusPolicy {
    /// Stateless clustering of the current cycle only
    Baseline,
    /// History-aware outlier rejection plus temporal smoothing
    Robust,
}

/// Consensus engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub policy: ConsensusPolicy,
    /// Readings retained per algorithm for the rolling median
    pub history_size: usize,
    /// History length required before outlier rejection kicks in
    pub min_readings_for_outlier_detection: usize,
    /// Max distance (BPM) from an algorithm's own median before a reading is excluded
    pub algorithm_outlier_threshold: f32,
    /// Max gap (BPM) between neighbouring sorted readings of one cluster
    pub cluster_tolerance: f32,
    /// Minimum members for a cluster to win
    pub min_cluster_size: usize,
    /// Weight of the newest raw value in exponential smoothing, in (0, 1]
    pub smoothing_factor: f32,
    /// Confidence multiplier applied on the weighted-median fallback path
    #[serde(default = "default_fallback_confidence_scale")]
    pub fallback_confidence_scale: f32,
    /// Confidence multiplier applied when the previous value is carried forward
    #[serde(default = "default_carried_forward_confidence_scale")]
    pub carried_forward_confidence_scale: f32,
    /// Fractional confidence reduction when any reading was rejected this cycle
    #[serde(default = "default_rejection_penalty")]
    pub rejection_penalty: f32,
}

fn default_fallback_confidence_scale() -> f32 {
    0.5
}

fn default_carried_forward_confidence_scale() -> f32 {
    0.5
}

fn default_rejection_penalty() -> f32 {
    0.2
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            policy: ConsensusPolicy::Robust,
            history_size: 10,
            min_readings_for_outlier_detection: 3,
            algorithm_outlier_threshold: 8.0,
            cluster_tolerance: 3.0,
            min_cluster_size: 2,
            smoothing_factor: 0.25,
            fallback_confidence_scale: default_fallback_confidence_scale(),
            carried_forward_confidence_scale: default_carried_forward_confidence_scale(),
            rejection_penalty: default_rejection_penalty(),
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_size == 0 {
            return Err(tuning("history_size", "must be greater than 0"));
        }
        if self.min_readings_for_outlier_detection == 0 {
            return Err(tuning(
                "min_readings_for_outlier_detection",
                "must be greater than 0",
            ));
        }
        if self.min_readings_for_outlier_detection > self.history_size {
            return Err(tuning(
                "min_readings_for_outlier_detection",
                "cannot exceed history_size",
            ));
        }
        if !(self.algorithm_outlier_threshold.is_finite() && self.algorithm_outlier_threshold > 0.0)
        {
            return Err(tuning("algorithm_outlier_threshold", "must be positive"));
        }
        if !(self.cluster_tolerance.is_finite() && self.cluster_tolerance > 0.0) {
            return Err(tuning("cluster_tolerance", "must be positive"));
        }
        if self.min_cluster_size == 0 {
            return Err(tuning("min_cluster_size", "must be greater than 0"));
        }
        if !(self.smoothing_factor > 0.0 && self.smoothing_factor <= 1.0) {
            return Err(tuning("smoothing_factor", "must be in (0, 1]"));
        }
        for (name, value) in [
            ("fallback_confidence_scale", self.fallback_confidence_scale),
            (
                "carried_forward_confidence_scale",
                self.carried_forward_confidence_scale,
            ),
            ("rejection_penalty", self.rejection_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(tuning(name, "must be in [0, 1]"));
            }
        }
        Ok(())
    }
}

fn tuning(parameter: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidTuning {
        parameter,
        reason: reason.to_string(),
    }
}

/// Coordinator scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Interval between successive analysis windows in seconds
    pub hop_duration_secs: f32,
    /// Per-algorithm budget; a slower algorithm abstains for the cycle
    pub algorithm_timeout_ms: u64,
    /// Capacity of the bounded window channel feeding the analysis task
    pub window_queue_capacity: usize,
    /// Broadcast buffer for consensus results (lagging subscribers drop old results)
    pub result_channel_capacity: usize,
    /// Broadcast buffer for state transitions
    pub state_channel_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            hop_duration_secs: 4.0,
            algorithm_timeout_ms: 2000,
            window_queue_capacity: 1,
            result_channel_capacity: 64,
            state_channel_capacity: 32,
        }
    }
}

impl CoordinatorConfig {
    pub fn validate(&self, window_duration_secs: f32) -> Result<(), ConfigError> {
        if !(self.hop_duration_secs.is_finite()
            && self.hop_duration_secs > 0.0
            && self.hop_duration_secs <= window_duration_secs)
        {
            return Err(ConfigError::InvalidHopDuration {
                hop_secs: self.hop_duration_secs,
                window_secs: window_duration_secs,
            });
        }
        if self.algorithm_timeout_ms == 0 {
            return Err(tuning("algorithm_timeout_ms", "must be greater than 0"));
        }
        if self.window_queue_capacity == 0
            || self.result_channel_capacity == 0
            || self.state_channel_capacity == 0
        {
            return Err(tuning("channel capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Enabled algorithm list plus per-algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmsConfig {
    /// Ordered, declarative list of variants the registry evaluates
    pub enabled: Vec<AlgorithmKind>,
    #[serde(default)]
    pub onset: OnsetConfig,
    #[serde(default)]
    pub autocorrelation: AutocorrelationConfig,
    #[serde(default)]
    pub spectral: SpectralConfig,
    #[serde(default)]
    pub wavelet: WaveletConfig,
}

impl Default for AlgorithmsConfig {
    fn default() -> Self {
        Self {
            enabled: AlgorithmKind::ALL.to_vec(),
            onset: OnsetConfig::default(),
            autocorrelation: AutocorrelationConfig::default(),
            spectral: SpectralConfig::default(),
            wavelet: WaveletConfig::default(),
        }
    }
}

impl AlgorithmsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled.is_empty() {
            return Err(ConfigError::NoAlgorithms);
        }
        let mut seen = HashSet::new();
        for kind in &self.enabled {
            if !seen.insert(*kind) {
                return Err(ConfigError::DuplicateAlgorithm {
                    algorithm: kind.to_string(),
                });
            }
        }
        self.onset.validate()?;
        self.autocorrelation.validate()?;
        self.spectral.validate()?;
        self.wavelet.validate()
    }
}

fn check_frames(
    algorithm: &'static str,
    frame_size: usize,
    hop_size: usize,
) -> Result<(), ConfigError> {
    if frame_size < 2 {
        return Err(ConfigError::InvalidAlgorithmParameter {
            algorithm,
            parameter: "frame_size",
            reason: format!("must be at least 2 (got {})", frame_size),
        });
    }
    if hop_size == 0 || hop_size > frame_size {
        return Err(ConfigError::InvalidAlgorithmParameter {
            algorithm,
            parameter: "hop_size",
            reason: format!("must be in [1, frame_size] (got {})", hop_size),
        });
    }
    Ok(())
}

fn check_non_negative(
    algorithm: &'static str,
    parameter: &'static str,
    value: f32,
) -> Result<(), ConfigError> {
    if !(value.is_finite() && value >= 0.0) {
        return Err(ConfigError::InvalidAlgorithmParameter {
            algorithm,
            parameter,
            reason: format!("must be finite and >= 0 (got {})", value),
        });
    }
    Ok(())
}

/// Onset histogram bin width bounds in BPM
const MIN_HISTOGRAM_RESOLUTION_BPM: f32 = 0.01;
const MAX_HISTOGRAM_RESOLUTION_BPM: f32 = 20.0;

/// Onset/energy algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnsetConfig {
    /// Energy sub-frame length in samples
    pub frame_size: usize,
    /// Sub-frame hop in samples
    pub hop_size: usize,
    /// Trailing frames used for the adaptive threshold statistics
    pub threshold_window: usize,
    /// Multiplier k in `mean + k * std`
    pub threshold_k: f32,
    /// Minimum detected onsets before an interval histogram is attempted
    pub min_onsets: usize,
    /// Histogram bin width in BPM
    pub histogram_resolution_bpm: f32,
    /// Windows quieter than this RMS abstain
    pub silence_rms: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        Self {
            frame_size: 512,
            hop_size: 256,
            threshold_window: 32,
            threshold_k: 1.5,
            min_onsets: 4,
            histogram_resolution_bpm: 1.0,
            silence_rms: 1e-3,
        }
    }
}

impl OnsetConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_frames("onset", self.frame_size, self.hop_size)?;
        if self.threshold_window == 0 {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "onset",
                parameter: "threshold_window",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.min_onsets < 2 {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "onset",
                parameter: "min_onsets",
                reason: "need at least 2 onsets for one interval".to_string(),
            });
        }
        if !(self.histogram_resolution_bpm.is_finite()
            && (MIN_HISTOGRAM_RESOLUTION_BPM..=MAX_HISTOGRAM_RESOLUTION_BPM)
                .contains(&self.histogram_resolution_bpm))
        {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "onset",
                parameter: "histogram_resolution_bpm",
                reason: format!(
                    "must be in [{}, {}] (got {})",
                    MIN_HISTOGRAM_RESOLUTION_BPM,
                    MAX_HISTOGRAM_RESOLUTION_BPM,
                    self.histogram_resolution_bpm
                ),
            });
        }
        check_non_negative("onset", "threshold_k", self.threshold_k)?;
        check_non_negative("onset", "silence_rms", self.silence_rms)
    }
}

/// Autocorrelation algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutocorrelationConfig {
    pub frame_size: usize,
    pub hop_size: usize,
    /// Minimum normalized correlation at the chosen lag
    pub min_peak_strength: f32,
    pub silence_rms: f32,
}

impl Default for AutocorrelationConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            hop_size: 512,
            min_peak_strength: 0.1,
            silence_rms: 1e-3,
        }
    }
}

impl AutocorrelationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_frames("autocorrelation", self.frame_size, self.hop_size)?;
        check_non_negative("autocorrelation", "min_peak_strength", self.min_peak_strength)?;
        check_non_negative("autocorrelation", "silence_rms", self.silence_rms)
    }
}

/// Spectral algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralConfig {
    /// STFT frame length (rounded up to a power of two)
    pub frame_size: usize,
    pub hop_size: usize,
    /// Minimum FFT length for the novelty spectrum; zero-padding improves BPM resolution
    pub min_novelty_fft_size: usize,
    /// Number of harmonics summed when scoring a candidate tempo
    pub harmonics: usize,
    pub silence_rms: f32,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            frame_size: 1024,
            hop_size: 512,
            min_novelty_fft_size: 4096,
            harmonics: 3,
            silence_rms: 1e-3,
        }
    }
}

impl SpectralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_frames("spectral", self.frame_size, self.hop_size)?;
        if self.harmonics == 0 {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "spectral",
                parameter: "harmonics",
                reason: "must be at least 1".to_string(),
            });
        }
        check_non_negative("spectral", "silence_rms", self.silence_rms)
    }
}

/// Wavelet-energy algorithm parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveletConfig {
    /// Haar decomposition depth; yields `levels + 1` sub-bands
    pub levels: usize,
    /// Envelope hop in input samples; must be divisible by `2^levels`
    pub envelope_hop: usize,
    /// Relative tolerance for a band to count as agreeing with the combined tempo
    pub agreement_tolerance: f32,
    pub min_peak_strength: f32,
    pub silence_rms: f32,
}

impl Default for WaveletConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            envelope_hop: 512,
            agreement_tolerance: 0.04,
            min_peak_strength: 0.1,
            silence_rms: 1e-3,
        }
    }
}

impl WaveletConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.levels == 0 || self.levels > 10 {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "wavelet",
                parameter: "levels",
                reason: format!("must be in [1, 10] (got {})", self.levels),
            });
        }
        let block = 1usize << self.levels;
        if self.envelope_hop == 0 || self.envelope_hop % block != 0 {
            return Err(ConfigError::InvalidAlgorithmParameter {
                algorithm: "wavelet",
                parameter: "envelope_hop",
                reason: format!("must be a positive multiple of {}", block),
            });
        }
        check_non_negative("wavelet", "agreement_tolerance", self.agreement_tolerance)?;
        check_non_negative("wavelet", "min_peak_strength", self.min_peak_strength)?;
        check_non_negative("wavelet", "silence_rms", self.silence_rms)
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Arguments
    /// * `path` - Path to JSON config file
    ///
    /// # Returns
    /// The parsed configuration, or the defaults if the file is missing or
    /// malformed. Parsed values are not validated here; construction of the
    /// coordinator calls [`AppConfig::validate`].
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the conventional assets location
    pub fn load() -> Self {
        Self::load_from_file("assets/tempo_config.json")
    }

    /// Check every section; the first violation is returned
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::analysis::DetectionContext::from_config(&self.detection)?;
        self.consensus.validate()?;
        self.coordinator
            .validate(self.detection.window_duration_secs)?;
        self.algorithms.validate()
    }
}
