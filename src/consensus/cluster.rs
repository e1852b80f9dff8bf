//! Gap clustering of per-algorithm readings.
//!
//! Readings are sorted by BPM and split wherever two neighbours are more
//! than `tolerance` apart. Sorting first makes the partition independent of
//! input order; a chain of close readings may therefore span more than
//! `tolerance` end to end.

use std::cmp::Ordering;

use crate::analysis::{dsp, AlgorithmKind, BpmReading};

/// Consecutive readings whose BPM gaps are all within tolerance
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingCluster {
    /// Sorted by BPM
    members: Vec<BpmReading>,
}

impl ReadingCluster {
    pub fn members(&self) -> &[BpmReading] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn algorithms(&self) -> Vec<AlgorithmKind> {
        self.members.iter().map(|r| r.algorithm).collect()
    }

    pub fn mean_confidence(&self) -> f32 {
        if self.members.is_empty() {
            return 0.0;
        }
        self.members.iter().map(|r| r.confidence).sum::<f32>() / self.members.len() as f32
    }

    /// Max minus min BPM
    pub fn spread(&self) -> f32 {
        match (self.members.first(), self.members.last()) {
            (Some(lo), Some(hi)) => hi.bpm - lo.bpm,
            _ => 0.0,
        }
    }

    /// Confidence-weighted mean BPM; falls back to the plain mean when all
    /// members carry zero confidence
    pub fn weighted_average(&self) -> f32 {
        let total: f32 = self.members.iter().map(|r| r.confidence).sum();
        if total > 0.0 {
            self.members.iter().map(|r| r.bpm * r.confidence).sum::<f32>() / total
        } else if self.members.is_empty() {
            0.0
        } else {
            self.members.iter().map(|r| r.bpm).sum::<f32>() / self.members.len() as f32
        }
    }
}

fn reading_order(a: &BpmReading, b: &BpmReading) -> Ordering {
    a.bpm
        .total_cmp(&b.bpm)
        .then(a.algorithm.cmp(&b.algorithm))
        .then(a.confidence.total_cmp(&b.confidence))
}

/// Partition readings into gap clusters, lowest BPM first
pub fn cluster_readings(readings: &[BpmReading], tolerance: f32) -> Vec<ReadingCluster> {
    let mut sorted = readings.to_vec();
    sorted.sort_by(reading_order);

    let mut clusters: Vec<ReadingCluster> = Vec::new();
    for reading in sorted {
        match clusters.last_mut() {
            Some(cluster)
                if cluster
                    .members
                    .last()
                    .map_or(false, |last| reading.bpm - last.bpm <= tolerance) =>
            {
                cluster.members.push(reading);
            }
            _ => clusters.push(ReadingCluster {
                members: vec![reading],
            }),
        }
    }
    clusters
}

/// Winner by size, then mean confidence, then tighter spread
///
/// Remaining ties keep the lower-BPM cluster. Returns `None` when no
/// cluster reaches `min_cluster_size`.
pub fn select_winner(
    clusters: &[ReadingCluster],
    min_cluster_size: usize,
) -> Option<&ReadingCluster> {
    let mut best: Option<&ReadingCluster> = None;
    for cluster in clusters.iter().filter(|c| c.size() >= min_cluster_size) {
        let better = match best {
            None => true,
            Some(current) => {
                let by_size = cluster.size().cmp(&current.size());
                let by_confidence = cluster
                    .mean_confidence()
                    .total_cmp(&current.mean_confidence());
                let by_spread = current.spread().total_cmp(&cluster.spread());
                by_size.then(by_confidence).then(by_spread) == Ordering::Greater
            }
        };
        if better {
            best = Some(cluster);
        }
    }
    best
}

/// Confidence-weighted median BPM
///
/// The smallest BPM at which the cumulative confidence reaches half of the
/// total. Zero total confidence degrades to the unweighted median.
pub fn weighted_median(readings: &[BpmReading]) -> Option<f32> {
    if readings.is_empty() {
        return None;
    }
    let mut sorted = readings.to_vec();
    sorted.sort_by(reading_order);

    let total: f32 = sorted.iter().map(|r| r.confidence).sum();
    if total <= 0.0 {
        let values: Vec<f32> = sorted.iter().map(|r| r.bpm).collect();
        return dsp::median(&values);
    }

    let half = total / 2.0;
    let mut cumulative = 0.0;
    for reading in &sorted {
        cumulative += reading.confidence;
        if cumulative >= half {
            return Some(reading.bpm);
        }
    }
    sorted.last().map(|r| r.bpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(algorithm: AlgorithmKind, bpm: f32, confidence: f32) -> BpmReading {
        BpmReading::new(algorithm, bpm, confidence, 0.0)
    }

    fn example() -> Vec<BpmReading> {
        vec![
            reading(AlgorithmKind::Onset, 120.0, 0.9),
            reading(AlgorithmKind::Autocorrelation, 121.0, 0.8),
            reading(AlgorithmKind::Spectral, 119.0, 0.85),
            reading(AlgorithmKind::Wavelet, 170.0, 0.4),
        ]
    }

    #[test]
    fn test_example_cluster() {
        let clusters = cluster_readings(&example(), 3.0);
        assert_eq!(clusters.len(), 2);

        let winner = select_winner(&clusters, 2).unwrap();
        assert_eq!(winner.size(), 3);
        assert!(!winner.algorithms().contains(&AlgorithmKind::Wavelet));
        assert!((winner.weighted_average() - 120.0).abs() < 0.1);
        assert_eq!(winner.spread(), 2.0);
    }

    #[test]
    fn test_clustering_independent_of_input_order() {
        let forward = cluster_readings(&example(), 3.0);
        let mut reversed = example();
        reversed.reverse();
        assert_eq!(forward, cluster_readings(&reversed, 3.0));

        let mut rotated = example();
        rotated.rotate_left(2);
        assert_eq!(forward, cluster_readings(&rotated, 3.0));
    }

    #[test]
    fn test_gap_exactly_at_tolerance_joins() {
        let readings = vec![
            reading(AlgorithmKind::Onset, 100.0, 0.5),
            reading(AlgorithmKind::Spectral, 103.0, 0.5),
            reading(AlgorithmKind::Wavelet, 106.5, 0.5),
        ];
        let clusters = cluster_readings(&readings, 3.0);
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].size(), 2);
    }

    #[test]
    fn test_chaining_spans_beyond_tolerance() {
        let readings = vec![
            reading(AlgorithmKind::Onset, 100.0, 0.5),
            reading(AlgorithmKind::Autocorrelation, 102.5, 0.5),
            reading(AlgorithmKind::Spectral, 105.0, 0.5),
        ];
        let clusters = cluster_readings(&readings, 3.0);
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].spread(), 5.0);
    }

    #[test]
    fn test_winner_tie_breaks() {
        // Equal sizes: higher mean confidence wins
        let readings = vec![
            reading(AlgorithmKind::Onset, 90.0, 0.3),
            reading(AlgorithmKind::Autocorrelation, 91.0, 0.3),
            reading(AlgorithmKind::Spectral, 150.0, 0.9),
            reading(AlgorithmKind::Wavelet, 151.0, 0.9),
        ];
        let clusters = cluster_readings(&readings, 3.0);
        let winner = select_winner(&clusters, 2).unwrap();
        assert_eq!(winner.algorithms(), vec![AlgorithmKind::Spectral, AlgorithmKind::Wavelet]);

        // Equal size and confidence: tighter spread wins
        let readings = vec![
            reading(AlgorithmKind::Onset, 90.0, 0.5),
            reading(AlgorithmKind::Autocorrelation, 92.5, 0.5),
            reading(AlgorithmKind::Spectral, 150.0, 0.5),
            reading(AlgorithmKind::Wavelet, 150.5, 0.5),
        ];
        let clusters = cluster_readings(&readings, 3.0);
        let winner = select_winner(&clusters, 2).unwrap();
        assert_eq!(winner.spread(), 0.5);
    }

    #[test]
    fn test_no_winner_below_min_size() {
        let readings = vec![
            reading(AlgorithmKind::Onset, 80.0, 0.5),
            reading(AlgorithmKind::Spectral, 120.0, 0.5),
            reading(AlgorithmKind::Wavelet, 160.0, 0.5),
        ];
        let clusters = cluster_readings(&readings, 3.0);
        assert_eq!(clusters.len(), 3);
        assert!(select_winner(&clusters, 2).is_none());
    }

    #[test]
    fn test_weighted_median() {
        let readings = vec![
            reading(AlgorithmKind::Onset, 80.0, 0.1),
            reading(AlgorithmKind::Spectral, 120.0, 0.8),
            reading(AlgorithmKind::Wavelet, 160.0, 0.1),
        ];
        assert_eq!(weighted_median(&readings), Some(120.0));

        let readings = vec![
            reading(AlgorithmKind::Onset, 80.0, 0.7),
            reading(AlgorithmKind::Spectral, 120.0, 0.2),
            reading(AlgorithmKind::Wavelet, 160.0, 0.1),
        ];
        assert_eq!(weighted_median(&readings), Some(80.0));
        assert_eq!(weighted_median(&[]), None);
    }

    #[test]
    fn test_weighted_median_zero_confidence() {
        let readings = vec![
            reading(AlgorithmKind::Onset, 80.0, 0.0),
            reading(AlgorithmKind::Spectral, 120.0, 0.0),
            reading(AlgorithmKind::Wavelet, 160.0, 0.0),
        ];
        assert_eq!(weighted_median(&readings), Some(120.0));
    }
}
