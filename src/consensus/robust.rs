// RobustConsensus - history-aware fusion
//
// Per cycle:
// 1. Each reading is checked against the median of its own algorithm's prior
//    history (once that history is long enough) and excluded from this
//    cycle's clustering if it deviates by more than the outlier threshold.
//    Every reading is then appended to its history, rejected or not.
// 2. Surviving readings are gap-clustered; the winner is averaged by
//    confidence. Without a large enough cluster the confidence-weighted
//    median is used at reduced confidence.
// 3. The raw value is smoothed: s = a * raw + (1 - a) * s_prev.
// 4. With nothing surviving, the previous smoothed value is carried forward
//    at reduced confidence.

use std::collections::BTreeMap;

use super::{
    cluster_confidence, cluster_readings, fallback_confidence, select_winner, weighted_median,
    AlgorithmHistory, ConsensusEngine, ConsensusResult, FusionMethod,
};
use crate::analysis::{AlgorithmKind, BpmReading, DetectionContext};
use crate::config::{ConsensusConfig, ConsensusPolicy};

#[derive(Debug, Clone, Copy, PartialEq)]
struct SmoothedState {
    bpm: f32,
    confidence: f32,
}

pub struct RobustConsensus {
    config: ConsensusConfig,
    context: DetectionContext,
    algorithm_count: usize,
    histories: BTreeMap<AlgorithmKind, AlgorithmHistory>,
    previous: Option<SmoothedState>,
}

impl RobustConsensus {
    pub fn new(config: ConsensusConfig, context: DetectionContext, algorithm_count: usize) -> Self {
        Self {
            config,
            context,
            algorithm_count,
            histories: BTreeMap::new(),
            previous: None,
        }
    }

    pub fn history(&self, algorithm: AlgorithmKind) -> Option<&AlgorithmHistory> {
        self.histories.get(&algorithm)
    }

    /// Last smoothed BPM, if any cycle produced one
    pub fn smoothed_bpm(&self) -> Option<f32> {
        self.previous.map(|state| state.bpm)
    }

    /// Split readings into survivors and rejected algorithms, updating history
    fn reject_outliers(
        &mut self,
        readings: &[BpmReading],
    ) -> (Vec<BpmReading>, Vec<AlgorithmKind>) {
        let mut survivors = Vec::with_capacity(readings.len());
        let mut rejected = Vec::new();

        for reading in readings {
            let history = self
                .histories
                .entry(reading.algorithm)
                .or_insert_with(|| AlgorithmHistory::new(self.config.history_size));

            let outlier = history.len() >= self.config.min_readings_for_outlier_detection
                && history.median().map_or(false, |median| {
                    (reading.bpm - median).abs() > self.config.algorithm_outlier_threshold
                });

            if outlier {
                tracing::debug!(
                    "[Consensus] Rejecting {} reading {:.1} BPM (median {:.1})",
                    reading.algorithm,
                    reading.bpm,
                    history.median().unwrap_or(reading.bpm)
                );
                rejected.push(reading.algorithm);
            } else {
                survivors.push(*reading);
            }
            history.push(reading.bpm);
        }

        (survivors, rejected)
    }

    fn smooth(&self, raw: f32) -> f32 {
        match self.previous {
            Some(previous) => {
                let alpha = self.config.smoothing_factor;
                alpha * raw + (1.0 - alpha) * previous.bpm
            }
            None => raw,
        }
    }
}

impl ConsensusEngine for RobustConsensus {
    fn fuse(&mut self, readings: &[BpmReading], timestamp_secs: f64) -> ConsensusResult {
        let total = self.algorithm_count.max(readings.len());
        let (survivors, rejected) = self.reject_outliers(readings);

        let result = |bpm: f32,
                      confidence: f32,
                      cluster: Vec<AlgorithmKind>,
                      method: FusionMethod| ConsensusResult {
            bpm,
            confidence,
            cluster,
            readings: readings.to_vec(),
            rejected: rejected.clone(),
            method,
            timestamp_secs,
        };

        if survivors.is_empty() {
            if let Some(previous) = self.previous {
                let confidence = previous.confidence * self.config.carried_forward_confidence_scale;
                self.previous = Some(SmoothedState {
                    bpm: previous.bpm,
                    confidence,
                });
                tracing::debug!(
                    "[Consensus] No surviving readings, carrying {:.1} BPM forward",
                    previous.bpm
                );
                return result(
                    previous.bpm,
                    confidence,
                    Vec::new(),
                    FusionMethod::CarriedForward,
                );
            }
            // Rejection needs a history that an earlier cycle has already
            // smoothed into `previous`, so reaching here means no readings
            return result(
                self.context.min_bpm(),
                0.0,
                Vec::new(),
                FusionMethod::NoReadings,
            );
        }

        let clusters = cluster_readings(&survivors, self.config.cluster_tolerance);
        let (raw, mut confidence, cluster, method) =
            match select_winner(&clusters, self.config.min_cluster_size) {
                Some(winner) => (
                    winner.weighted_average(),
                    cluster_confidence(winner, total, self.config.cluster_tolerance),
                    winner.algorithms(),
                    FusionMethod::Cluster,
                ),
                None => (
                    weighted_median(&survivors).unwrap_or(self.context.min_bpm()),
                    fallback_confidence(
                        &survivors,
                        total,
                        self.config.fallback_confidence_scale,
                    ),
                    survivors.iter().map(|r| r.algorithm).collect(),
                    FusionMethod::WeightedMedian,
                ),
            };

        if !rejected.is_empty() {
            confidence *= 1.0 - self.config.rejection_penalty;
        }

        let smoothed = self.context.clamp_bpm(self.smooth(self.context.clamp_bpm(raw)));
        self.previous = Some(SmoothedState {
            bpm: smoothed,
            confidence,
        });

        tracing::debug!(
            "[Consensus] raw {:.2} -> smoothed {:.2} BPM ({:?}, confidence {:.2})",
            raw,
            smoothed,
            method,
            confidence
        );

        result(smoothed, confidence, cluster, method)
    }

    fn reset(&mut self) {
        self.histories.clear();
        self.previous = None;
    }

    fn policy(&self) -> ConsensusPolicy {
        ConsensusPolicy::Robust
    }
}
