//! Sample Source
//!
//! Polls the transducer on a fixed period, validates each reading, and
//! pushes it (valid or not) into the sample queue without ever blocking
//! the sampling period. Repeated bus failures trigger a bus reset, which
//! is reported to the lifecycle controller.

use embassy_time::{Duration, Instant, Ticker, with_timeout};
use log::{debug, error, info, warn};

use crate::app_state::{LifecycleEvent, Stage, SystemContext};
use crate::config::SamplingConfig;
use crate::queue::{BoundedQueue, DropCounter};
use crate::sensors::{PressureSensor, SensorError};
use crate::stats::{StatsTimer, fill_percent};
use crate::types::RawSample;

/// Result of validating one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Valid,
    OutOfRange,
    ExcessiveVariation,
    /// The variation-failure run reached its limit and this reading became
    /// the new baseline. The reading itself is still reported invalid.
    Rebaselined,
}

impl Validation {
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Range and rate-of-change checks against the last accepted reading.
#[derive(Debug, Clone)]
pub struct SampleValidator {
    raw_min: u32,
    raw_max: u32,
    max_variation: Option<u32>,
    rebaseline_after: u32,
    baseline: Option<u32>,
    consecutive_invalid: u32,
    rebaselines: u32,
}

impl SampleValidator {
    pub fn new(config: &SamplingConfig) -> Self {
        Self {
            raw_min: config.raw_min,
            raw_max: config.raw_max,
            max_variation: config
                .variation_check
                .then(|| config.max_sample_variation()),
            rebaseline_after: config.invalid_run_before_rebaseline.max(1),
            baseline: None,
            consecutive_invalid: 0,
            rebaselines: 0,
        }
    }

    pub fn check(&mut self, raw: u32) -> Validation {
        if raw <= self.raw_min || raw >= self.raw_max {
            return Validation::OutOfRange;
        }

        if let (Some(limit), Some(baseline)) = (self.max_variation, self.baseline) {
            if raw.abs_diff(baseline) > limit {
                self.consecutive_invalid += 1;
                if self.consecutive_invalid >= self.rebaseline_after {
                    self.baseline = Some(raw);
                    self.consecutive_invalid = 0;
                    self.rebaselines += 1;
                    return Validation::Rebaselined;
                }
                return Validation::ExcessiveVariation;
            }
        }

        self.baseline = Some(raw);
        self.consecutive_invalid = 0;
        Validation::Valid
    }

    /// Forget the baseline; the next in-range reading is accepted as is.
    pub fn reset_baseline(&mut self) {
        self.baseline = None;
        self.consecutive_invalid = 0;
    }

    pub fn baseline(&self) -> Option<u32> {
        self.baseline
    }

    pub fn rebaselines(&self) -> u32 {
        self.rebaselines
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub reads: u32,
    pub valid: u32,
    pub invalid: u32,
    pub bus_faults: u32,
    pub bus_resets: u32,
    pub dropped: u32,
}

/// Periodic acquisition stage wrapping a [`PressureSensor`].
pub struct PressureSource<S> {
    sensor: S,
    validator: SampleValidator,
    sample_interval: Duration,
    bus_timeout: Duration,
    bus_failures_before_reset: u32,
    bus_failure_run: u32,
    drops: DropCounter,
    stats: SourceStats,
}

impl<S> PressureSource<S> {
    pub fn new(sensor: S, config: &SamplingConfig) -> Self {
        Self {
            sensor,
            validator: SampleValidator::new(config),
            sample_interval: Duration::from_millis(config.sample_interval_ms()),
            bus_timeout: Duration::from_millis(config.bus_timeout_ms),
            bus_failures_before_reset: config.bus_failures_before_reset.max(1),
            bus_failure_run: 0,
            drops: DropCounter::new(config.drop_log_interval),
            stats: SourceStats::default(),
        }
    }

    pub fn stats(&self) -> &SourceStats {
        &self.stats
    }

    pub fn validator(&self) -> &SampleValidator {
        &self.validator
    }

    /// Turn the outcome of one bus read into a sample.
    ///
    /// Failed reads produce an invalid sample with a zero value.
    pub fn record_read(&mut self, timestamp_ms: u64, result: Result<u32, SensorError>) -> RawSample {
        self.stats.reads = self.stats.reads.wrapping_add(1);
        match result {
            Ok(raw) => {
                self.bus_failure_run = 0;
                match self.validator.check(raw) {
                    Validation::Valid => {
                        self.stats.valid = self.stats.valid.wrapping_add(1);
                        RawSample::valid(timestamp_ms, raw)
                    }
                    outcome => {
                        self.stats.invalid = self.stats.invalid.wrapping_add(1);
                        if outcome == Validation::Rebaselined {
                            info!(
                                "Validation baseline reset to {} after {} rejected samples",
                                raw, self.validator.rebaseline_after
                            );
                        } else {
                            debug!("Rejected sample {} ({:?})", raw, outcome);
                        }
                        RawSample::invalid(timestamp_ms, raw)
                    }
                }
            }
            Err(e) => {
                self.stats.invalid = self.stats.invalid.wrapping_add(1);
                self.stats.bus_faults = self.stats.bus_faults.wrapping_add(1);
                self.bus_failure_run += 1;
                if self.bus_failure_run == 1 {
                    warn!("Pressure read failed: {}", e);
                }
                RawSample::invalid(timestamp_ms, 0)
            }
        }
    }

    /// Whether the consecutive bus-failure run has reached the reset limit.
    pub fn needs_bus_reset(&self) -> bool {
        self.bus_failure_run >= self.bus_failures_before_reset
    }

    /// Apply the outcome of a bus reset. Returns whether recovery succeeded.
    ///
    /// The failure run restarts either way so a dead bus is retried every
    /// `bus_failures_before_reset` reads rather than on every read.
    pub fn complete_bus_reset(&mut self, result: Result<(), SensorError>) -> bool {
        self.bus_failure_run = 0;
        match result {
            Ok(()) => {
                self.validator.reset_baseline();
                self.stats.bus_resets = self.stats.bus_resets.wrapping_add(1);
                info!("Sensor bus recovered, validation baseline cleared");
                true
            }
            Err(e) => {
                error!("Sensor bus reset failed: {}", e);
                false
            }
        }
    }

    /// Best-effort enqueue. A full queue drops the sample and the onset of
    /// an overload episode is reported once.
    pub fn enqueue<const N: usize>(
        &mut self,
        queue: &BoundedQueue<RawSample, N>,
        sample: RawSample,
        ctx: &SystemContext,
    ) -> bool {
        match queue.try_push(sample) {
            Ok(()) => {
                self.drops.record_delivery();
                true
            }
            Err(_) => {
                let report = self.drops.record_drop();
                self.stats.dropped = report.total;
                if report.should_log {
                    warn!("Sample queue full, {} samples dropped", report.total);
                }
                if report.onset {
                    ctx.notify(LifecycleEvent::QueueFull);
                }
                false
            }
        }
    }

    pub fn log_stats(&self, queue_depth: usize, queue_capacity: usize) {
        let s = &self.stats;
        info!(
            "[Source] reads={} valid={} invalid={} bus_faults={} bus_resets={} rebaselines={} dropped={} queue={}/{} ({}%)",
            s.reads,
            s.valid,
            s.invalid,
            s.bus_faults,
            s.bus_resets,
            self.validator.rebaselines(),
            s.dropped,
            queue_depth,
            queue_capacity,
            fill_percent(queue_depth, queue_capacity)
        );
    }
}

impl<S: PressureSensor> PressureSource<S> {
    /// Read the transducer once, bounded by the bus timeout.
    pub async fn acquire(&mut self, ctx: &SystemContext) -> RawSample {
        let timestamp_ms = Instant::now().as_millis();
        let result = match with_timeout(self.bus_timeout, self.sensor.read_raw()).await {
            Ok(result) => result,
            Err(_) => Err(SensorError::Timeout { sensor: "pressure" }),
        };
        let sample = self.record_read(timestamp_ms, result);

        if self.needs_bus_reset() {
            warn!(
                "{} consecutive bus failures, reinitializing sensor bus",
                self.bus_failures_before_reset
            );
            let result = self.sensor.reinitialize().await;
            if self.complete_bus_reset(result) {
                ctx.notify(LifecycleEvent::BusRecovered);
            }
        }
        sample
    }

    /// Acquisition loop. Runs on a fixed period while the Source stage is
    /// enabled; state is retained across pauses.
    pub async fn run<const N: usize>(
        &mut self,
        queue: &BoundedQueue<RawSample, N>,
        ctx: &SystemContext,
        stats_interval_ms: u64,
    ) {
        let mut ticker = Ticker::every(self.sample_interval);
        let mut stats_timer = StatsTimer::new(stats_interval_ms, Instant::now().as_millis());
        let mut paused = false;

        info!(
            "Sample source started: period={}ms, bus timeout={}ms",
            self.sample_interval.as_millis(),
            self.bus_timeout.as_millis()
        );

        loop {
            ticker.next().await;

            if !ctx.is_running(Stage::Source) {
                paused = true;
                continue;
            }
            if paused {
                // Skip the ticks missed while paused instead of bursting
                ticker.reset();
                paused = false;
            }

            let sample = self.acquire(ctx).await;
            self.enqueue(queue, sample, ctx);

            if stats_timer.due(sample.timestamp_ms) {
                self.log_stats(queue.len(), N);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SamplingConfig {
        SamplingConfig::default()
    }

    #[test]
    fn test_range_check_is_strict() {
        let mut validator = SampleValidator::new(&config());
        assert_eq!(validator.check(10_000), Validation::OutOfRange);
        assert_eq!(validator.check(16_000_000), Validation::OutOfRange);
        assert_eq!(validator.check(10_001), Validation::Valid);
    }

    #[test]
    fn test_step_change_rebaselines_exactly_once() {
        let mut validator = SampleValidator::new(&config());
        assert!(validator.check(3_000_000).is_valid());

        // 1,000,000 jump is well over the 300,000 per-sample limit
        let outcomes: heapless::Vec<Validation, 20> =
            (0..20).map(|_| validator.check(4_000_000)).collect();

        for outcome in &outcomes[..9] {
            assert_eq!(*outcome, Validation::ExcessiveVariation);
        }
        assert_eq!(outcomes[9], Validation::Rebaselined);
        assert!(outcomes[10..].iter().all(|o| o.is_valid()));
        assert_eq!(validator.rebaselines(), 1);
        assert_eq!(validator.baseline(), Some(4_000_000));
    }

    #[test]
    fn test_out_of_range_does_not_count_toward_rebaseline() {
        let mut validator = SampleValidator::new(&config());
        assert!(validator.check(3_000_000).is_valid());
        for _ in 0..50 {
            assert_eq!(validator.check(5), Validation::OutOfRange);
        }
        assert_eq!(validator.rebaselines(), 0);
        assert_eq!(validator.baseline(), Some(3_000_000));
    }

    #[test]
    fn test_variation_check_can_be_disabled() {
        let mut cfg = config();
        cfg.variation_check = false;
        let mut validator = SampleValidator::new(&cfg);
        assert!(validator.check(1_000_000).is_valid());
        assert!(validator.check(9_000_000).is_valid());
    }

    #[test]
    fn test_bus_failures_trigger_reset_and_clear_baseline() {
        let mut source = PressureSource::new((), &config());
        assert!(source.record_read(0, Ok(3_000_000)).is_valid);

        let fault = SensorError::Timeout { sensor: "test" };
        for i in 1..10 {
            let sample = source.record_read(i * 10, Err(fault));
            assert!(!sample.is_valid);
            assert_eq!(sample.raw_value, 0);
            assert!(!source.needs_bus_reset());
        }
        source.record_read(100, Err(fault));
        assert!(source.needs_bus_reset());

        assert!(source.complete_bus_reset(Ok(())));
        assert!(!source.needs_bus_reset());
        assert_eq!(source.validator().baseline(), None);
        assert_eq!(source.stats().bus_faults, 10);
        assert_eq!(source.stats().bus_resets, 1);

        // New operating point after recovery is accepted immediately
        assert!(source.record_read(110, Ok(8_000_000)).is_valid);
    }

    #[test]
    fn test_successful_read_breaks_failure_run() {
        let mut source = PressureSource::new((), &config());
        let fault = SensorError::Malformed { sensor: "test" };
        for _ in 0..9 {
            source.record_read(0, Err(fault));
        }
        source.record_read(0, Ok(3_000_000));
        source.record_read(0, Err(fault));
        assert!(!source.needs_bus_reset());
    }

    #[test]
    fn test_full_queue_drops_and_notifies_once() {
        let ctx = SystemContext::new();
        let queue: BoundedQueue<RawSample, 4> = BoundedQueue::new();
        let mut source = PressureSource::new((), &config());

        for i in 0..10 {
            source.enqueue(&queue, RawSample::valid(i, 3_000_000), &ctx);
        }
        assert_eq!(queue.len(), 4);
        assert_eq!(source.stats().dropped, 6);
        assert_eq!(ctx.take_notification(), Some(LifecycleEvent::QueueFull));
        assert_eq!(ctx.take_notification(), None);

        // FIFO: oldest samples survive, newest are dropped
        assert_eq!(queue.try_pop().map(|s| s.timestamp_ms), Some(0));
    }

    /// Never answers a read; counts bus recoveries.
    struct HungSensor {
        reinitializations: u32,
    }

    impl PressureSensor for HungSensor {
        async fn read_raw(&mut self) -> Result<u32, SensorError> {
            core::future::pending().await
        }

        async fn reinitialize(&mut self) -> Result<(), SensorError> {
            self.reinitializations += 1;
            Ok(())
        }
    }

    struct FixedSensor(u32);

    impl PressureSensor for FixedSensor {
        async fn read_raw(&mut self) -> Result<u32, SensorError> {
            Ok(self.0)
        }

        async fn reinitialize(&mut self) -> Result<(), SensorError> {
            Ok(())
        }
    }

    #[test]
    fn test_hung_read_times_out_and_recovers_bus() {
        let ctx = SystemContext::new();
        let mut cfg = config();
        cfg.bus_timeout_ms = 2;
        cfg.bus_failures_before_reset = 3;
        let mut source = PressureSource::new(
            HungSensor {
                reinitializations: 0,
            },
            &cfg,
        );

        for _ in 0..2 {
            let sample = embassy_futures::block_on(source.acquire(&ctx));
            assert!(!sample.is_valid);
            assert_eq!(sample.raw_value, 0);
        }
        assert_eq!(source.sensor.reinitializations, 0);
        assert_eq!(ctx.take_notification(), None);

        embassy_futures::block_on(source.acquire(&ctx));
        assert_eq!(source.sensor.reinitializations, 1);
        assert_eq!(source.stats().bus_faults, 3);
        assert_eq!(source.stats().bus_resets, 1);
        assert_eq!(ctx.take_notification(), Some(LifecycleEvent::BusRecovered));
    }

    #[test]
    fn test_acquire_returns_validated_reading() {
        let ctx = SystemContext::new();
        let mut source = PressureSource::new(FixedSensor(3_450_000), &config());
        let sample = embassy_futures::block_on(source.acquire(&ctx));
        assert!(sample.is_valid);
        assert_eq!(sample.raw_value, 3_450_000);
        assert_eq!(source.stats().valid, 1);
    }
}
