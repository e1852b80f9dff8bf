use std::collections::VecDeque;

use crate::analysis::dsp;

/// Bounded per-algorithm BPM history with a rolling median
#[derive(Debug, Clone)]
pub struct AlgorithmHistory {
    capacity: usize,
    values: VecDeque<f32>,
}

impl AlgorithmHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a value, evicting the oldest beyond capacity
    pub fn push(&mut self, bpm: f32) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(bpm);
    }

    pub fn median(&self) -> Option<f32> {
        let (front, back) = self.values.as_slices();
        if back.is_empty() {
            return dsp::median(front);
        }
        let contiguous: Vec<f32> = self.values.iter().copied().collect();
        dsp::median(&contiguous)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn values(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
