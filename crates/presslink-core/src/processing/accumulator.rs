use crate::config::MAX_SAMPLES_PER_EVENT;
use crate::types::{EventKind, PressureEvent, PressureSample, SampleBuffer, TriggerReason};

/// Classify a finished change capture.
///
/// An average derivative inside `stable_band` (in units per second) is
/// noise and classifies as [`EventKind::Stable`]; otherwise the net change
/// and the average derivative must agree in sign for a rise or fall.
pub fn classify(avg_derivative: f32, start_value: u32, end_value: u32, stable_band: f32) -> EventKind {
    if libm::fabsf(avg_derivative) < stable_band {
        return EventKind::Stable;
    }
    let change = end_value as i64 - start_value as i64;
    if change > 0 && avg_derivative > 0.0 {
        EventKind::Rising
    } else if change < 0 && avg_derivative < 0.0 {
        EventKind::Falling
    } else {
        EventKind::Oscillation
    }
}

/// Running statistics for a STABLE period. Keeps no per-sample detail.
#[derive(Debug, Clone, Default)]
pub struct StableAccumulator {
    start_ms: u64,
    sum: u64,
    count: u32,
    min: u32,
    max: u32,
}

impl StableAccumulator {
    pub const fn new() -> Self {
        Self {
            start_ms: 0,
            sum: 0,
            count: 0,
            min: 0,
            max: 0,
        }
    }

    pub fn add(&mut self, timestamp_ms: u64, value: u32) {
        if self.count == 0 {
            self.start_ms = timestamp_ms;
            self.min = value;
            self.max = value;
        }
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value as u64;
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Spread between the lowest and highest value seen.
    pub fn span(&self) -> u32 {
        self.max - self.min
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// Close the period as a STABLE event whose start and end value are the
    /// period average, and reset the accumulator.
    pub fn finish(&mut self, end_ms: u64) -> Option<PressureEvent> {
        if self.count == 0 {
            return None;
        }
        let average = (self.sum / self.count as u64) as u32;
        let event = PressureEvent {
            start_timestamp_ms: self.start_ms,
            end_timestamp_ms: end_ms.max(self.start_ms),
            kind: EventKind::Stable,
            start_value: average,
            end_value: average,
            sample_count: self.count,
            trigger: TriggerReason::Timeout,
            samples: SampleBuffer::new(),
        };
        *self = Self::new();
        Some(event)
    }
}

/// Detailed capture of a CHANGING period.
#[derive(Debug, Clone)]
pub struct ChangeCapture {
    start_ms: u64,
    end_ms: u64,
    start_value: u32,
    end_value: u32,
    count: u32,
    trigger: TriggerReason,
    samples: SampleBuffer,
    capacity: usize,
}

impl ChangeCapture {
    /// `capacity` is clamped to [`MAX_SAMPLES_PER_EVENT`].
    pub fn new(capacity: usize) -> Self {
        Self {
            start_ms: 0,
            end_ms: 0,
            start_value: 0,
            end_value: 0,
            count: 0,
            trigger: TriggerReason::DerivativeRising,
            samples: SampleBuffer::new(),
            capacity: capacity.clamp(1, MAX_SAMPLES_PER_EVENT),
        }
    }

    pub fn add(&mut self, sample: PressureSample) {
        if self.count == 0 {
            self.start_ms = sample.timestamp_ms;
            self.start_value = sample.filtered_value;
            self.trigger = TriggerReason::from_derivative(sample.derivative);
        }
        if self.samples.len() < self.capacity {
            // Bounded by the check above
            let _ = self.samples.push(sample);
        }
        self.end_ms = sample.timestamp_ms;
        self.end_value = sample.filtered_value;
        self.count += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count as usize >= self.capacity
    }

    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    pub fn trigger(&self) -> TriggerReason {
        self.trigger
    }

    fn average_derivative(&self) -> f32 {
        if self.count <= 1 || self.samples.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.samples.iter().map(|s| s.derivative).sum();
        sum / self.samples.len() as f32
    }

    /// Classify and close the capture, leaving it empty for the next one.
    pub fn finish(&mut self, stable_band: f32) -> Option<PressureEvent> {
        if self.count == 0 {
            return None;
        }
        let kind = classify(
            self.average_derivative(),
            self.start_value,
            self.end_value,
            stable_band,
        );
        let event = PressureEvent {
            start_timestamp_ms: self.start_ms,
            end_timestamp_ms: self.end_ms,
            kind,
            start_value: self.start_value,
            end_value: self.end_value,
            sample_count: self.count,
            trigger: self.trigger,
            samples: core::mem::take(&mut self.samples),
        };
        *self = Self::new(self.capacity);
        Some(event)
    }
}
