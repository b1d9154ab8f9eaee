use heapless::Deque;

use crate::config::MAX_DERIVATIVE_WINDOW;

/// Sliding window of `(timestamp_ms, value)` pairs used to estimate the
/// rate of change of the filtered signal.
#[derive(Debug, Clone)]
pub struct DerivativeWindow {
    entries: Deque<(u64, f32), MAX_DERIVATIVE_WINDOW>,
    len_limit: usize,
}

impl DerivativeWindow {
    /// `len_limit` is clamped to `2..=MAX_DERIVATIVE_WINDOW`.
    pub fn new(len_limit: usize) -> Self {
        Self {
            entries: Deque::new(),
            len_limit: len_limit.clamp(2, MAX_DERIVATIVE_WINDOW),
        }
    }

    pub fn push(&mut self, timestamp_ms: u64, value: f32) {
        if self.entries.len() >= self.len_limit {
            self.entries.pop_front();
        }
        // Cannot fail: a slot was freed above if needed
        let _ = self.entries.push_back((timestamp_ms, value));
    }

    /// Slope between the oldest and newest entry in units per second.
    /// Zero with fewer than two entries or no elapsed time.
    pub fn derivative(&self) -> f32 {
        let (Some(&(t0, v0)), Some(&(t1, v1))) = (self.entries.front(), self.entries.back()) else {
            return 0.0;
        };
        if self.entries.len() < 2 || t1 <= t0 {
            return 0.0;
        }
        (v1 - v0) * 1000.0 / (t1 - t0) as f32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
