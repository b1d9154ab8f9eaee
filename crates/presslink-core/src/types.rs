//! Data records passed between pipeline stages

use crate::config::{MAX_PAYLOAD_LEN, MAX_SAMPLES_PER_EVENT, MAX_TOPIC_LEN};

/// One reading from the transducer as produced by the Sample Source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    /// Milliseconds since boot.
    pub timestamp_ms: u64,
    /// 24-bit reading in the low bits. Zero when the bus read failed.
    pub raw_value: u32,
    pub is_valid: bool,
}

impl RawSample {
    pub const fn valid(timestamp_ms: u64, raw_value: u32) -> Self {
        Self {
            timestamp_ms,
            raw_value,
            is_valid: true,
        }
    }

    pub const fn invalid(timestamp_ms: u64, raw_value: u32) -> Self {
        Self {
            timestamp_ms,
            raw_value,
            is_valid: false,
        }
    }
}

/// A filtered sample with its smoothed derivative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PressureSample {
    pub timestamp_ms: u64,
    pub filtered_value: u32,
    /// Raw units per second.
    pub derivative: f32,
}

/// Classification of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Stable,
    Rising,
    Falling,
    Oscillation,
}

impl EventKind {
    /// Wire label used in the `type` field.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Rising => "rising",
            Self::Falling => "falling",
            Self::Oscillation => "oscillation",
        }
    }
}

/// Why a change event started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    DerivativeRising,
    DerivativeFalling,
    Timeout,
    BufferFull,
}

impl TriggerReason {
    /// Wire label used in the `triggerReason` field.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::DerivativeRising => "derivative_rising",
            Self::DerivativeFalling => "derivative_falling",
            Self::Timeout => "timeout",
            Self::BufferFull => "buffer_full",
        }
    }

    /// Trigger matching the sign of a derivative.
    pub fn from_derivative(derivative: f32) -> Self {
        if derivative >= 0.0 {
            Self::DerivativeRising
        } else {
            Self::DerivativeFalling
        }
    }
}

/// Detector state of the Signal Processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignalState {
    #[default]
    Stable,
    Changing,
}

impl SignalState {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Stable => "STABLE",
            Self::Changing => "CHANGING",
        }
    }
}

/// Detailed samples attached to a change event.
pub type SampleBuffer = heapless::Vec<PressureSample, MAX_SAMPLES_PER_EVENT>;

/// A stable period or a change captured by the Signal Processor.
#[derive(Debug, Clone, PartialEq)]
pub struct PressureEvent {
    pub start_timestamp_ms: u64,
    pub end_timestamp_ms: u64,
    pub kind: EventKind,
    pub start_value: u32,
    pub end_value: u32,
    pub sample_count: u32,
    pub trigger: TriggerReason,
    /// Empty for stable events.
    pub samples: SampleBuffer,
}

impl PressureEvent {
    /// Whether the event carries per-sample detail.
    pub fn has_detailed_samples(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_timestamp_ms.saturating_sub(self.start_timestamp_ms)
    }

    /// Structural sanity check applied before an event is batched.
    pub fn is_well_formed(&self) -> bool {
        if self.end_timestamp_ms < self.start_timestamp_ms || self.sample_count == 0 {
            return false;
        }
        if self.samples.len() as u32 > self.sample_count {
            return false;
        }
        match self.samples.first() {
            Some(first) => first.timestamp_ms >= self.start_timestamp_ms,
            None => true,
        }
    }
}

/// MQTT-style delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub const fn from_level(level: u8) -> Self {
        match level {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            _ => Self::ExactlyOnce,
        }
    }

    pub const fn level(&self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// A serialized batch ready for the publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: heapless::String<MAX_TOPIC_LEN>,
    pub payload: heapless::Vec<u8, MAX_PAYLOAD_LEN>,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}
