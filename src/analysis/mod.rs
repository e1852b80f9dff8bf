// Analysis module - tempo estimation algorithms
//
// This module defines the shared algorithm contract and its four concrete
// strategies. Each algorithm turns one immutable AudioWindow into at most
// one BpmReading; the registry fans a window out to all configured
// algorithms and isolates their failures.
//
// Architecture:
// - DetectionContext: validated sample rate, BPM bounds and window length
// - TempoAlgorithm: evaluate(window, context) -> Option<BpmReading>
// - Strategies: onset/energy, autocorrelation, spectral, wavelet-energy
// - AlgorithmRegistry: concurrent evaluation with per-algorithm timeout

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod autocorrelation;
pub mod context;
pub mod dsp;
pub mod onset;
pub mod registry;
pub mod spectral;
pub mod wavelet;

pub use autocorrelation::AutocorrelationAlgorithm;
pub use context::DetectionContext;
pub use onset::OnsetAlgorithm;
pub use registry::{AlgorithmOutcome, AlgorithmRegistry};
pub use spectral::SpectralAlgorithm;
pub use wavelet::WaveletAlgorithm;

/// Identifier of a tempo estimation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmKind {
    Onset,
    Autocorrelation,
    Spectral,
    Wavelet,
}

impl AlgorithmKind {
    /// All variants in their default evaluation order
    pub const ALL: [AlgorithmKind; 4] = [
        AlgorithmKind::Onset,
        AlgorithmKind::Autocorrelation,
        AlgorithmKind::Spectral,
        AlgorithmKind::Wavelet,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::Onset => "onset",
            AlgorithmKind::Autocorrelation => "autocorrelation",
            AlgorithmKind::Spectral => "spectral",
            AlgorithmKind::Wavelet => "wavelet",
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of normalized samples handed to every algorithm
///
/// Produced by the coordinator's sliding buffer; the sample storage is
/// shared (`Arc<[f32]>`) so fanning one window out to several workers
/// never copies or mutates it.
#[derive(Debug, Clone)]
pub struct AudioWindow {
    samples: Arc<[f32]>,
    start_sample: u64,
    sample_rate: u32,
}

impl AudioWindow {
    pub fn new(samples: Vec<f32>, start_sample: u64, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            start_sample,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Absolute index of the first sample since the session started
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    /// Start timestamp in seconds since the session started
    pub fn start_time_secs(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate.max(1) as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn rms(&self) -> f32 {
        dsp::rms(&self.samples)
    }
}

/// One algorithm's tempo estimate for one analysis cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BpmReading {
    pub algorithm: AlgorithmKind,
    pub bpm: f32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Start time of the analysed window, seconds since session start
    pub timestamp_secs: f64,
}

impl BpmReading {
    /// Build a reading, clamping confidence into [0, 1]
    pub fn new(algorithm: AlgorithmKind, bpm: f32, confidence: f32, timestamp_secs: f64) -> Self {
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            algorithm,
            bpm,
            confidence,
            timestamp_secs,
        }
    }
}

/// Cooperative cancellation signal shared between the coordinator and workers
///
/// Flags form a tree: a child reports cancelled once it or any ancestor has
/// been cancelled, while cancelling a child leaves its parent untouched.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    parent: Option<Box<CancelFlag>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a flag that also trips when `self` does
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .map_or(false, |parent| parent.is_cancelled())
    }
}

/// Shared contract of every tempo estimation strategy
///
/// Implementations must be deterministic, perform no I/O and either return
/// a BPM inside `[context.min_bpm(), context.max_bpm()]` or abstain with
/// `None`. Near-silence and missing periodicity are abstentions, never
/// errors.
pub trait TempoAlgorithm: Send + Sync {
    fn kind(&self) -> AlgorithmKind;

    fn evaluate(&self, window: &AudioWindow, context: &DetectionContext) -> Option<BpmReading>;

    /// Evaluate while observing a cancellation signal
    ///
    /// Algorithms with long inner loops override this to poll `cancel`
    /// between stages; the default checks once up front.
    fn evaluate_with_cancel(
        &self,
        window: &AudioWindow,
        context: &DetectionContext,
        cancel: &CancelFlag,
    ) -> Option<BpmReading> {
        if cancel.is_cancelled() {
            return None;
        }
        self.evaluate(window, context)
    }
}

/// Build the ordered algorithm list described by configuration
pub fn build_algorithms(
    config: &crate::config::AlgorithmsConfig,
) -> Vec<Arc<dyn TempoAlgorithm>> {
    config
        .enabled
        .iter()
        .map(|kind| -> Arc<dyn TempoAlgorithm> {
            match kind {
                AlgorithmKind::Onset => Arc::new(OnsetAlgorithm::new(config.onset.clone())),
                AlgorithmKind::Autocorrelation => Arc::new(AutocorrelationAlgorithm::new(
                    config.autocorrelation.clone(),
                )),
                AlgorithmKind::Spectral => {
                    Arc::new(SpectralAlgorithm::new(config.spectral.clone()))
                }
                AlgorithmKind::Wavelet => Arc::new(WaveletAlgorithm::new(config.wavelet.clone())),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_timing() {
        let window = AudioWindow::new(vec![0.0; 44100], 88200, 44100);
        assert_eq!(window.len(), 44100);
        assert!((window.start_time_secs() - 2.0).abs() < 1e-9);
        assert!((window.duration_secs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_clone_shares_samples() {
        let window = AudioWindow::new(vec![0.5; 16], 0, 8000);
        let clone = window.clone();
        assert!(std::ptr::eq(window.samples().as_ptr(), clone.samples().as_ptr()));
    }

    #[test]
    fn test_reading_confidence_clamped() {
        let reading = BpmReading::new(AlgorithmKind::Onset, 120.0, 1.7, 0.0);
        assert_eq!(reading.confidence, 1.0);
        let reading = BpmReading::new(AlgorithmKind::Onset, 120.0, f32::NAN, 0.0);
        assert_eq!(reading.confidence, 0.0);
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_child_flag_follows_parent_only_downwards() {
        let session = CancelFlag::new();
        let worker = session.child();
        let sibling = session.child();

        worker.cancel();
        assert!(worker.is_cancelled());
        assert!(!session.is_cancelled());
        assert!(!sibling.is_cancelled());

        session.cancel();
        assert!(sibling.is_cancelled());
        assert!(sibling.child().is_cancelled());
    }

    #[test]
    fn test_build_algorithms_respects_order() {
        let mut config = crate::config::AlgorithmsConfig::default();
        config.enabled = vec![AlgorithmKind::Spectral, AlgorithmKind::Onset];
        let algorithms = build_algorithms(&config);
        let kinds: Vec<_> = algorithms.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![AlgorithmKind::Spectral, AlgorithmKind::Onset]);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&AlgorithmKind::Autocorrelation).unwrap();
        assert_eq!(json, "\"autocorrelation\"");
    }
}
