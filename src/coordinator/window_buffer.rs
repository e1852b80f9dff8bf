use std::collections::VecDeque;

use crate::analysis::AudioWindow;

/// A window cut at a hop boundary
#[derive(Debug, Clone)]
pub struct ExtractedWindow {
    pub window: AudioWindow,
    /// Earlier boundaries crossed by the same push and not extracted
    pub skipped: u64,
}

/// Rolling sample buffer cutting overlapping windows every hop
///
/// Window `k` covers absolute samples
/// `[k * hop, k * hop + window)`. Only samples the next window can still
/// need are retained, so memory stays at roughly `window + hop` samples.
pub struct SlidingWindowBuffer {
    window_len: usize,
    hop_len: usize,
    sample_rate: u32,
    samples: VecDeque<f32>,
    /// Absolute index of `samples[0]`
    buffer_start: u64,
    /// Total samples received
    received: u64,
    /// Absolute end index of the next window to cut
    next_end: u64,
}

impl SlidingWindowBuffer {
    pub fn new(window_len: usize, hop_len: usize, sample_rate: u32) -> Self {
        let window_len = window_len.max(1);
        let hop_len = hop_len.clamp(1, window_len);
        Self {
            window_len,
            hop_len,
            sample_rate,
            samples: VecDeque::with_capacity(window_len + hop_len),
            buffer_start: 0,
            received: 0,
            next_end: window_len as u64,
        }
    }

    /// Append samples and cut the latest window whose boundary was reached
    ///
    /// When one push crosses several boundaries only the newest window is
    /// returned; the others are reported in `skipped`.
    pub fn push(&mut self, chunk: &[f32]) -> Option<ExtractedWindow> {
        self.samples.extend(chunk.iter().copied());
        self.received += chunk.len() as u64;

        if self.received < self.next_end {
            return None;
        }

        let hop = self.hop_len as u64;
        let crossed = (self.received - self.next_end) / hop + 1;
        let end = self.next_end + (crossed - 1) * hop;
        let start = end - self.window_len as u64;

        let offset = (start - self.buffer_start) as usize;
        let window: Vec<f32> = self
            .samples
            .range(offset..offset + self.window_len)
            .copied()
            .collect();

        self.next_end = end + hop;
        let keep_from = self.next_end - self.window_len as u64;
        let discard = ((keep_from - self.buffer_start) as usize).min(self.samples.len());
        self.samples.drain(..discard);
        self.buffer_start += discard as u64;

        Some(ExtractedWindow {
            window: AudioWindow::new(window, start, self.sample_rate),
            skipped: crossed - 1,
        })
    }

    /// Samples currently held
    pub fn retained(&self) -> usize {
        self.samples.len()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn hop_len(&self) -> usize {
        self.hop_len
    }

    /// Samples shared by consecutive windows
    pub fn overlap_len(&self) -> usize {
        self.window_len - self.hop_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DetectionContext;

    fn ramp(start: usize, len: usize) -> Vec<f32> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_reference_geometry() {
        let context = DetectionContext::new(44100, 60.0, 200.0, 6.0).unwrap();
        let buffer =
            SlidingWindowBuffer::new(context.window_len(), context.seconds_to_samples(4.0), 44100);
        assert_eq!(buffer.window_len(), 264_600);
        assert_eq!(buffer.hop_len(), 176_400);
        assert_eq!(buffer.overlap_len(), 88_200);
    }

    #[test]
    fn test_windows_overlap_by_window_minus_hop() {
        let mut buffer = SlidingWindowBuffer::new(6, 4, 1);
        let mut windows = Vec::new();
        for i in 0..20 {
            if let Some(extracted) = buffer.push(&[i as f32]) {
                assert_eq!(extracted.skipped, 0);
                windows.push(extracted.window);
            }
        }

        let starts: Vec<u64> = windows.iter().map(|w| w.start_sample()).collect();
        assert_eq!(starts, vec![0, 4, 8, 12]);
        assert_eq!(windows[0].samples(), ramp(0, 6).as_slice());
        assert_eq!(windows[1].samples(), ramp(4, 6).as_slice());
        assert_eq!(&windows[0].samples()[4..], &windows[1].samples()[..2]);
    }

    #[test]
    fn test_retention_bounded() {
        let mut buffer = SlidingWindowBuffer::new(600, 400, 100);
        for chunk in 0..100 {
            buffer.push(&ramp(chunk * 50, 50));
            assert!(buffer.retained() <= 600 + 400);
        }
        assert_eq!(buffer.received(), 5000);
    }

    #[test]
    fn test_large_push_emits_latest_and_counts_skipped() {
        let mut buffer = SlidingWindowBuffer::new(6, 2, 1);
        let extracted = buffer.push(&ramp(0, 13)).unwrap();
        // Boundaries at 6, 8, 10, 12 were crossed
        assert_eq!(extracted.skipped, 3);
        assert_eq!(extracted.window.start_sample(), 6);
        assert_eq!(extracted.window.samples(), ramp(6, 6).as_slice());

        let next = buffer.push(&[13.0]).unwrap();
        assert_eq!(next.window.start_sample(), 8);
        assert_eq!(next.window.samples(), ramp(8, 6).as_slice());
    }

    #[test]
    fn test_no_window_before_full_length() {
        let mut buffer = SlidingWindowBuffer::new(10, 5, 1);
        assert!(buffer.push(&[0.0; 9]).is_none());
        assert!(buffer.push(&[0.0]).is_some());
    }
}
