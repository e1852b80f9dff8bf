// Consensus module - fuses one cycle's readings into a single tempo
//
// Two interchangeable policies share the ConsensusEngine contract:
// - BaselineConsensus: stateless gap clustering of the current readings
// - RobustConsensus: per-algorithm history, self-median outlier rejection,
//   clustering, weighted-median fallback and exponential smoothing
//
// Every call to `fuse` yields exactly one ConsensusResult, clamped into the
// detection context's BPM range.

use serde::{Deserialize, Serialize};

use crate::analysis::{AlgorithmKind, BpmReading, DetectionContext};
use crate::config::{ConsensusConfig, ConsensusPolicy};

pub mod baseline;
pub mod cluster;
pub mod history;
pub mod robust;

pub use baseline::BaselineConsensus;
pub use cluster::{cluster_readings, select_winner, weighted_median, ReadingCluster};
pub use history::AlgorithmHistory;
pub use robust::RobustConsensus;

/// How a result's BPM was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// Weighted average of a winning cluster
    Cluster,
    /// No cluster reached the minimum size; confidence-weighted median
    WeightedMedian,
    /// No surviving readings; previous smoothed value repeated
    CarriedForward,
    /// No readings and nothing to carry forward
    NoReadings,
}

/// Fused tempo for one analysis cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub bpm: f32,
    pub confidence: f32,
    /// Algorithms whose readings contributed to `bpm`
    pub cluster: Vec<AlgorithmKind>,
    /// Every reading of the cycle, including rejected ones
    pub readings: Vec<BpmReading>,
    /// Algorithms excluded by outlier rejection this cycle
    pub rejected: Vec<AlgorithmKind>,
    pub method: FusionMethod,
    /// Start time of the analysed window, seconds since session start
    pub timestamp_secs: f64,
}

pub trait ConsensusEngine: Send {
    fn fuse(&mut self, readings: &[BpmReading], timestamp_secs: f64) -> ConsensusResult;

    /// Forget history and smoothing state
    fn reset(&mut self);

    fn policy(&self) -> ConsensusPolicy;
}

/// Build the engine selected by `config.policy`
///
/// `algorithm_count` is the number of configured algorithms; cluster
/// agreement is measured against it.
pub fn build_engine(
    config: &ConsensusConfig,
    context: DetectionContext,
    algorithm_count: usize,
) -> Box<dyn ConsensusEngine> {
    match config.policy {
        ConsensusPolicy::Baseline => Box::new(BaselineConsensus::new(
            config.clone(),
            context,
            algorithm_count,
        )),
        ConsensusPolicy::Robust => Box::new(RobustConsensus::new(
            config.clone(),
            context,
            algorithm_count,
        )),
    }
}

/// Confidence of a winning cluster
///
/// Product of three factors in [0, 1]:
/// - agreement: cluster size over the number of algorithms
/// - tightness: 1 at zero spread, 0.5 once the spread reaches the tolerance
/// - member confidence: 0.5 + 0.5 * mean member confidence
pub(crate) fn cluster_confidence(cluster: &ReadingCluster, total: usize, tolerance: f32) -> f32 {
    let agreement = cluster.size() as f32 / total.max(cluster.size()).max(1) as f32;
    let relative_spread = if tolerance > 0.0 {
        (cluster.spread() / tolerance).min(1.0)
    } else {
        0.0
    };
    let tightness = 1.0 - 0.5 * relative_spread;
    let member = 0.5 + 0.5 * cluster.mean_confidence();
    (agreement * tightness * member).clamp(0.0, 1.0)
}

/// Confidence of a weighted-median fallback over `readings`
pub(crate) fn fallback_confidence(readings: &[BpmReading], total: usize, scale: f32) -> f32 {
    if readings.is_empty() {
        return 0.0;
    }
    let mean = readings.iter().map(|r| r.confidence).sum::<f32>() / readings.len() as f32;
    let share = readings.len() as f32 / total.max(readings.len()) as f32;
    (scale * mean * share).clamp(0.0, 1.0)
}
