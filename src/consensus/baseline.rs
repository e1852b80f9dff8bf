use super::{
    cluster_confidence, cluster_readings, fallback_confidence, select_winner, weighted_median,
    ConsensusEngine, ConsensusResult, FusionMethod,
};
use crate::analysis::{BpmReading, DetectionContext};
use crate::config::{ConsensusConfig, ConsensusPolicy};

/// Stateless reference policy: cluster the current readings, average the winner
pub struct BaselineConsensus {
    config: ConsensusConfig,
    context: DetectionContext,
    algorithm_count: usize,
}

impl BaselineConsensus {
    pub fn new(config: ConsensusConfig, context: DetectionContext, algorithm_count: usize) -> Self {
        Self {
            config,
            context,
            algorithm_count,
        }
    }
}

impl ConsensusEngine for BaselineConsensus {
    fn fuse(&mut self, readings: &[BpmReading], timestamp_secs: f64) -> ConsensusResult {
        let total = self.algorithm_count.max(readings.len());
        let clusters = cluster_readings(readings, self.config.cluster_tolerance);

        let (bpm, confidence, cluster, method) =
            match select_winner(&clusters, self.config.min_cluster_size) {
                Some(winner) => (
                    winner.weighted_average(),
                    cluster_confidence(winner, total, self.config.cluster_tolerance),
                    winner.algorithms(),
                    FusionMethod::Cluster,
                ),
                None => match weighted_median(readings) {
                    Some(median) => (
                        median,
                        fallback_confidence(
                            readings,
                            total,
                            self.config.fallback_confidence_scale,
                        ),
                        readings.iter().map(|r| r.algorithm).collect(),
                        FusionMethod::WeightedMedian,
                    ),
                    None => (
                        self.context.min_bpm(),
                        0.0,
                        Vec::new(),
                        FusionMethod::NoReadings,
                    ),
                },
            };

        ConsensusResult {
            bpm: self.context.clamp_bpm(bpm),
            confidence,
            cluster,
            readings: readings.to_vec(),
            rejected: Vec::new(),
            method,
            timestamp_secs,
        }
    }

    fn reset(&mut self) {}

    fn policy(&self) -> ConsensusPolicy {
        ConsensusPolicy::Baseline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AlgorithmKind;

    fn engine() -> BaselineConsensus {
        BaselineConsensus::new(
            ConsensusConfig::default(),
            DetectionContext::new(44100, 60.0, 200.0, 6.0).unwrap(),
            4,
        )
    }

    #[test]
    fn test_example_readings() {
        let readings = vec![
            BpmReading::new(AlgorithmKind::Onset, 120.0, 0.9, 0.0),
            BpmReading::new(AlgorithmKind::Autocorrelation, 121.0, 0.8, 0.0),
            BpmReading::new(AlgorithmKind::Spectral, 119.0, 0.85, 0.0),
            BpmReading::new(AlgorithmKind::Wavelet, 170.0, 0.4, 0.0),
        ];
        let result = engine().fuse(&readings, 4.0);

        assert_eq!(result.method, FusionMethod::Cluster);
        assert!((result.bpm - 120.0).abs() < 0.1);
        assert!(!result.cluster.contains(&AlgorithmKind::Wavelet));
        assert_eq!(result.readings.len(), 4);
        assert_eq!(result.timestamp_secs, 4.0);
    }

    #[test]
    fn test_stateless_between_cycles() {
        let mut engine = engine();
        let first = vec![
            BpmReading::new(AlgorithmKind::Onset, 100.0, 0.9, 0.0),
            BpmReading::new(AlgorithmKind::Spectral, 100.0, 0.9, 0.0),
        ];
        let second = vec![
            BpmReading::new(AlgorithmKind::Onset, 150.0, 0.9, 4.0),
            BpmReading::new(AlgorithmKind::Spectral, 150.0, 0.9, 4.0),
        ];
        engine.fuse(&first, 0.0);
        assert_eq!(engine.fuse(&second, 4.0).bpm, 150.0);
    }

    #[test]
    fn test_fallback_and_empty() {
        let mut engine = engine();
        let scattered = vec![
            BpmReading::new(AlgorithmKind::Onset, 80.0, 0.5, 0.0),
            BpmReading::new(AlgorithmKind::Spectral, 130.0, 0.6, 0.0),
        ];
        let result = engine.fuse(&scattered, 0.0);
        assert_eq!(result.method, FusionMethod::WeightedMedian);
        assert_eq!(result.bpm, 130.0);
        assert!(result.confidence < 0.5);

        let empty = engine.fuse(&[], 0.0);
        assert_eq!(empty.method, FusionMethod::NoReadings);
        assert_eq!(empty.bpm, 60.0);
        assert_eq!(empty.confidence, 0.0);
    }
}
