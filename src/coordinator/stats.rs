use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::analysis::AlgorithmOutcome;

/// Per-session counters, updated lock-free from the ingestion and analysis tasks
#[derive(Debug, Default)]
pub struct SessionStats {
    samples_received: AtomicU64,
    windows_dispatched: AtomicU64,
    hops_skipped: AtomicU64,
    results_emitted: AtomicU64,
    algorithm_timeouts: AtomicU64,
    algorithm_failures: AtomicU64,
    abstentions: AtomicU64,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub samples_received: u64,
    pub windows_dispatched: u64,
    pub hops_skipped: u64,
    pub results_emitted: u64,
    pub algorithm_timeouts: u64,
    pub algorithm_failures: u64,
    pub abstentions: u64,
}

impl SessionStats {
    pub fn record_samples(&self, count: usize) {
        self.samples_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.windows_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, hops: u64) {
        if hops > 0 {
            self.hops_skipped.fetch_add(hops, Ordering::Relaxed);
        }
    }

    pub fn record_result(&self) {
        self.results_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Tally non-reading outcomes of one cycle
    pub fn record_outcomes(&self, outcomes: &[AlgorithmOutcome]) {
        for outcome in outcomes {
            let counter = match outcome {
                AlgorithmOutcome::Reading(_) => continue,
                AlgorithmOutcome::Abstained(_) => &self.abstentions,
                AlgorithmOutcome::TimedOut(_) => &self.algorithm_timeouts,
                AlgorithmOutcome::Failed { .. } => &self.algorithm_failures,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.samples_received,
            &self.windows_dispatched,
            &self.hops_skipped,
            &self.results_emitted,
            &self.algorithm_timeouts,
            &self.algorithm_failures,
            &self.abstentions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            windows_dispatched: self.windows_dispatched.load(Ordering::Relaxed),
            hops_skipped: self.hops_skipped.load(Ordering::Relaxed),
            results_emitted: self.results_emitted.load(Ordering::Relaxed),
            algorithm_timeouts: self.algorithm_timeouts.load(Ordering::Relaxed),
            algorithm_failures: self.algorithm_failures.load(Ordering::Relaxed),
            abstentions: self.abstentions.load(Ordering::Relaxed),
        }
    }
}
