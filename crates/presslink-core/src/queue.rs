//! Bounded inter-stage queues and drop accounting
//!
//! Every hop in the pipeline goes through a [`BoundedQueue`]: a fixed-size
//! FIFO backed by an embassy [`Channel`] that can live in a `static`.
//! Producers never block indefinitely; they either try once or wait for a
//! bounded time, and count what they drop with a [`DropCounter`].

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};

/// Fixed-capacity FIFO shared between exactly one producer stage and one
/// consumer stage.
pub struct BoundedQueue<T, const N: usize> {
    channel: Channel<CriticalSectionRawMutex, T, N>,
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueue without waiting. A full queue hands the item back.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        self.channel.try_send(item).map_err(|e| match e {
            embassy_sync::channel::TrySendError::Full(item) => item,
        })
    }

    /// Enqueue, waiting at most `timeout` for a free slot.
    ///
    /// The item is consumed either way; a timeout means it was dropped.
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> bool {
        with_timeout(timeout, self.channel.send(item)).await.is_ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    /// Dequeue, waiting at most `timeout` for an item.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        with_timeout(timeout, self.channel.receive()).await.ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

/// Outcome of recording one dropped unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropReport {
    /// Drops since the counter was created.
    pub total: u32,
    /// First drop, or every `log_every`-th drop after it.
    pub should_log: bool,
    /// First drop since the last successful delivery.
    pub onset: bool,
}

/// Counts drops on a full queue and rate-limits how they are reported.
///
/// Warnings are due on the first drop and then every `log_every` drops.
/// An overload *onset* is reported once until a delivery succeeds again,
/// so the lifecycle controller hears about sustained overflow once instead
/// of per sample.
#[derive(Debug, Clone)]
pub struct DropCounter {
    dropped: u32,
    log_every: u32,
    overflowing: bool,
}

impl DropCounter {
    pub const fn new(log_every: u32) -> Self {
        Self {
            dropped: 0,
            log_every: if log_every == 0 { 1 } else { log_every },
            overflowing: false,
        }
    }

    pub fn record_drop(&mut self) -> DropReport {
        self.dropped = self.dropped.saturating_add(1);
        let onset = !self.overflowing;
        self.overflowing = true;
        DropReport {
            total: self.dropped,
            should_log: self.dropped == 1 || self.dropped % self.log_every == 0,
            onset,
        }
    }

    /// A successful enqueue ends the current overload episode.
    pub fn record_delivery(&mut self) {
        self.overflowing = false;
    }

    pub fn total(&self) -> u32 {
        self.dropped
    }
}
