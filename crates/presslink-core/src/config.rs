//! Pipeline configuration
//!
//! Runtime-tunable parameters are grouped per stage and deserialize with
//! `#[serde(default)]`, so a partial JSON document only overrides what it
//! names. Container capacities are compile-time constants: every queue and
//! buffer in the pipeline is statically sized.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Capacity of the raw sample queue (source -> processor).
/// Three seconds of samples at the default 100 Hz.
pub const SAMPLE_QUEUE_CAPACITY: usize = 300;

/// Capacity of the event queue (processor -> batcher).
pub const EVENT_QUEUE_CAPACITY: usize = 10;

/// Capacity of the outbound message queue (batcher -> publisher).
pub const MESSAGE_QUEUE_CAPACITY: usize = 10;

/// Capacity of the lifecycle notification queue.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 16;

/// Upper bound on detailed samples stored in a single event.
pub const MAX_SAMPLES_PER_EVENT: usize = 100;

/// Upper bound on the derivative window length.
pub const MAX_DERIVATIVE_WINDOW: usize = 128;

/// Upper bound on events packed into one outbound message.
pub const MAX_EVENTS_PER_BATCH: usize = 8;

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

/// Hard limit on a serialized outbound payload in bytes.
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Maximum sensor identifier length in bytes.
pub const MAX_SENSOR_ID_LEN: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration value out of range: {field}")]
    OutOfRange { field: &'static str },
    #[error("configuration value {field} exceeds compile-time capacity {limit}")]
    ExceedsCapacity { field: &'static str, limit: usize },
}

/// Sample Source parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SamplingConfig {
    pub sample_rate_hz: u32,
    pub i2c_address: u8,
    pub read_command: u8,
    /// Per-read bus timeout.
    pub bus_timeout_ms: u64,
    /// Readings must be strictly above this value.
    pub raw_min: u32,
    /// Readings must be strictly below this value.
    pub raw_max: u32,
    pub variation_check: bool,
    /// Physical rate-of-change limit; divided by the sample rate to get the
    /// allowed per-sample delta.
    pub max_change_per_second: u32,
    /// Consecutive variation failures before the baseline is reset.
    pub invalid_run_before_rebaseline: u32,
    /// Consecutive bus failures before the sensor is reinitialized.
    pub bus_failures_before_reset: u32,
    /// Drop warnings are logged for the first drop and every Nth after.
    pub drop_log_interval: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 100,
            i2c_address: 0x6D,
            read_command: 0x06,
            bus_timeout_ms: 10,
            raw_min: 10_000,
            raw_max: 16_000_000,
            variation_check: true,
            max_change_per_second: 30_000_000,
            invalid_run_before_rebaseline: 10,
            bus_failures_before_reset: 10,
            drop_log_interval: 100,
        }
    }
}

impl SamplingConfig {
    /// Sampling period in milliseconds.
    pub fn sample_interval_ms(&self) -> u64 {
        (1000 / self.sample_rate_hz.max(1)).max(1) as u64
    }

    /// Largest allowed change between consecutive valid samples.
    pub fn max_sample_variation(&self) -> u32 {
        self.max_change_per_second / self.sample_rate_hz.max(1)
    }
}

/// Signal Processor parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    pub processor_tick_ms: u64,
    pub primary_alpha: f32,
    pub secondary_alpha: f32,
    pub derivative_alpha: f32,
    /// Samples in the derivative window.
    pub derivative_window: usize,
    /// Derivative threshold in raw units per second.
    pub derivative_threshold: f32,
    /// Exit threshold as a fraction of the entry threshold.
    pub hysteresis_factor: f32,
    pub min_event_duration_ms: u64,
    pub max_stable_duration_ms: u64,
    pub max_changing_duration_ms: u64,
    pub max_samples_per_event: usize,
    /// Average derivative below this fraction of the threshold classifies a
    /// change event as stable.
    pub stable_classification_fraction: f32,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            processor_tick_ms: 100,
            primary_alpha: 0.1,
            secondary_alpha: 0.05,
            derivative_alpha: 0.1,
            derivative_window: 50,
            derivative_threshold: 120_000.0,
            hysteresis_factor: 0.8,
            min_event_duration_ms: 50,
            max_stable_duration_ms: 10_000,
            max_changing_duration_ms: 5_000,
            max_samples_per_event: MAX_SAMPLES_PER_EVENT,
            stable_classification_fraction: 0.3,
        }
    }
}

/// Message Batcher parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BatchingConfig {
    pub sensor_id: heapless::String<MAX_SENSOR_ID_LEN>,
    pub topic_prefix: heapless::String<64>,
    pub max_events_per_message: usize,
    pub flush_timeout_ms: u64,
    pub batcher_tick_ms: u64,
    /// Change events with more samples than this are sent without the
    /// detailed sample array.
    pub max_json_samples: u32,
    /// Estimated-size ceiling for a single message.
    pub payload_ceiling: usize,
    pub qos: u8,
    pub send_timeout_ms: u64,
    /// Poll interval while the publisher reports it is not ready.
    pub pause_poll_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        let mut sensor_id = heapless::String::new();
        let _ = sensor_id.push_str("gateway-0001");
        let mut topic_prefix = heapless::String::new();
        let _ = topic_prefix.push_str("telemetry/gateway");
        Self {
            sensor_id,
            topic_prefix,
            max_events_per_message: 5,
            flush_timeout_ms: 1000,
            batcher_tick_ms: 300,
            max_json_samples: 50,
            payload_ceiling: MAX_PAYLOAD_LEN - 512,
            qos: 0,
            send_timeout_ms: 100,
            pause_poll_ms: 1000,
        }
    }
}

/// Lifecycle Controller parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub tick_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            restart_delay_ms: 5000,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub sampling: SamplingConfig,
    pub signal: SignalConfig,
    pub batching: BatchingConfig,
    pub lifecycle: LifecycleConfig,
    pub stats_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sampling: SamplingConfig::default(),
            signal: SignalConfig::default(),
            batching: BatchingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            stats_interval_ms: 30_000,
        }
    }
}

fn unit_interval(value: f32, field: &'static str) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { field })
    }
}

fn non_zero(value: u64, field: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::OutOfRange { field })
    } else {
        Ok(())
    }
}

fn within(value: usize, limit: usize, field: &'static str) -> Result<(), ConfigError> {
    if value > limit {
        Err(ConfigError::ExceedsCapacity { field, limit })
    } else {
        Ok(())
    }
}

impl PipelineConfig {
    /// Check every parameter against its valid range and the compile-time
    /// capacities it has to fit in.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sampling;
        if s.sample_rate_hz == 0 || s.sample_rate_hz > 1000 {
            return Err(ConfigError::OutOfRange {
                field: "sampling.sample_rate_hz",
            });
        }
        if s.raw_min >= s.raw_max || s.raw_max > 0x00FF_FFFF {
            return Err(ConfigError::OutOfRange {
                field: "sampling.raw_min/raw_max",
            });
        }
        non_zero(s.bus_timeout_ms, "sampling.bus_timeout_ms")?;
        non_zero(
            s.invalid_run_before_rebaseline as u64,
            "sampling.invalid_run_before_rebaseline",
        )?;
        non_zero(
            s.bus_failures_before_reset as u64,
            "sampling.bus_failures_before_reset",
        )?;
        non_zero(s.drop_log_interval as u64, "sampling.drop_log_interval")?;

        let p = &self.signal;
        non_zero(p.processor_tick_ms, "signal.processor_tick_ms")?;
        unit_interval(p.primary_alpha, "signal.primary_alpha")?;
        unit_interval(p.secondary_alpha, "signal.secondary_alpha")?;
        unit_interval(p.derivative_alpha, "signal.derivative_alpha")?;
        unit_interval(p.hysteresis_factor, "signal.hysteresis_factor")?;
        unit_interval(
            p.stable_classification_fraction,
            "signal.stable_classification_fraction",
        )?;
        if p.derivative_window < 2 {
            return Err(ConfigError::OutOfRange {
                field: "signal.derivative_window",
            });
        }
        within(
            p.derivative_window,
            MAX_DERIVATIVE_WINDOW,
            "signal.derivative_window",
        )?;
        if p.derivative_threshold.is_nan() || p.derivative_threshold <= 0.0 {
            return Err(ConfigError::OutOfRange {
                field: "signal.derivative_threshold",
            });
        }
        non_zero(p.max_stable_duration_ms, "signal.max_stable_duration_ms")?;
        non_zero(p.max_changing_duration_ms, "signal.max_changing_duration_ms")?;
        non_zero(p.max_samples_per_event as u64, "signal.max_samples_per_event")?;
        within(
            p.max_samples_per_event,
            MAX_SAMPLES_PER_EVENT,
            "signal.max_samples_per_event",
        )?;

        let b = &self.batching;
        if b.sensor_id.is_empty() {
            return Err(ConfigError::OutOfRange {
                field: "batching.sensor_id",
            });
        }
        // prefix + '/' + id + "/pressure-events"
        within(
            b.topic_prefix.len() + b.sensor_id.len() + 17,
            MAX_TOPIC_LEN,
            "batching topic",
        )?;
        non_zero(
            b.max_events_per_message as u64,
            "batching.max_events_per_message",
        )?;
        within(
            b.max_events_per_message,
            MAX_EVENTS_PER_BATCH,
            "batching.max_events_per_message",
        )?;
        non_zero(b.flush_timeout_ms, "batching.flush_timeout_ms")?;
        non_zero(b.batcher_tick_ms, "batching.batcher_tick_ms")?;
        non_zero(b.pause_poll_ms, "batching.pause_poll_ms")?;
        within(b.payload_ceiling, MAX_PAYLOAD_LEN, "batching.payload_ceiling")?;
        if b.qos > 2 {
            return Err(ConfigError::OutOfRange {
                field: "batching.qos",
            });
        }

        non_zero(self.lifecycle.tick_ms, "lifecycle.tick_ms")?;
        non_zero(self.stats_interval_ms, "stats_interval_ms")?;
        Ok(())
    }
}
