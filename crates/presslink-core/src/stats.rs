//! Periodic statistics reporting
//!
//! Each stage keeps its own counters and logs a one-line summary when its
//! [`StatsTimer`] comes due. There is no interactive diagnostic channel, so
//! these log lines are how an operator sees drop counters and queue depth.

/// Fires once per interval on a caller-supplied millisecond clock.
#[derive(Debug, Clone, Copy)]
pub struct StatsTimer {
    interval_ms: u64,
    last_ms: u64,
}

impl StatsTimer {
    pub const fn new(interval_ms: u64, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: now_ms,
        }
    }

    /// Returns `true` at most once per interval and rearms the timer.
    pub fn due(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_ms) >= self.interval_ms {
            self.last_ms = now_ms;
            true
        } else {
            false
        }
    }
}

/// Fill level of a queue as a percentage, for log lines.
pub fn fill_percent(len: usize, capacity: usize) -> u8 {
    if capacity == 0 {
        return 0;
    }
    ((len.min(capacity) * 100) / capacity) as u8
}
