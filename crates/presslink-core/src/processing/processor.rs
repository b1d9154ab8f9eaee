use embassy_time::{Duration, Instant, Ticker};
use log::{debug, info, warn};

use super::{
    CascadedEma, ChangeCapture, DerivativeWindow, Ema, HysteresisDetector, StableAccumulator,
    Transition,
};
use crate::app_state::{LifecycleEvent, Stage, SystemContext};
use crate::config::SignalConfig;
use crate::queue::{BoundedQueue, DropCounter};
use crate::stats::{StatsTimer, fill_percent};
use crate::types::{PressureEvent, PressureSample, RawSample, SignalState};

/// Drop warnings for the event queue are rate limited to this interval.
const EVENT_DROP_LOG_INTERVAL: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub samples_processed: u32,
    pub samples_skipped: u32,
    pub stable_events: u32,
    pub change_events: u32,
}

/// Per-sample signal pipeline: smoothing, derivative, hysteresis and event
/// accumulation.
///
/// [`process`](Self::process) and [`flush`](Self::flush) hand finished
/// events to a caller-supplied sink, so the algorithm runs the same way in
/// the async stage and in tests.
pub struct SignalProcessor {
    filter: CascadedEma,
    window: DerivativeWindow,
    derivative_filter: Ema,
    detector: HysteresisDetector,
    stable: StableAccumulator,
    capture: ChangeCapture,
    derivative: f32,
    last_timestamp_ms: Option<u64>,
    stable_band: f32,
    max_stable_ms: u64,
    max_changing_ms: u64,
    tick: Duration,
    stats: ProcessorStats,
}

impl SignalProcessor {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            filter: CascadedEma::new(config.primary_alpha, config.secondary_alpha),
            window: DerivativeWindow::new(config.derivative_window),
            derivative_filter: Ema::with_initial(config.derivative_alpha, 0.0),
            detector: HysteresisDetector::new(
                config.derivative_threshold,
                config.hysteresis_factor,
                config.min_event_duration_ms,
            ),
            stable: StableAccumulator::new(),
            capture: ChangeCapture::new(config.max_samples_per_event),
            derivative: 0.0,
            last_timestamp_ms: None,
            stable_band: config.derivative_threshold * config.stable_classification_fraction,
            max_stable_ms: config.max_stable_duration_ms,
            max_changing_ms: config.max_changing_duration_ms,
            tick: Duration::from_millis(config.processor_tick_ms),
            stats: ProcessorStats::default(),
        }
    }

    pub fn state(&self) -> SignalState {
        self.detector.state()
    }

    /// Latest smoothed derivative in units per second.
    pub fn derivative(&self) -> f32 {
        self.derivative
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    fn finish_stable(&mut self, end_ms: u64, emit: &mut impl FnMut(PressureEvent)) {
        if let Some(event) = self.stable.finish(end_ms) {
            self.stats.stable_events = self.stats.stable_events.wrapping_add(1);
            debug!(
                "Stable period {}-{} ms avg={} samples={}",
                event.start_timestamp_ms, event.end_timestamp_ms, event.start_value, event.sample_count
            );
            emit(event);
        }
    }

    fn finish_change(&mut self, emit: &mut impl FnMut(PressureEvent)) {
        if let Some(event) = self.capture.finish(self.stable_band) {
            self.stats.change_events = self.stats.change_events.wrapping_add(1);
            debug!(
                "Change event {} {}-{} ms {}->{} samples={}",
                event.kind.label(),
                event.start_timestamp_ms,
                event.end_timestamp_ms,
                event.start_value,
                event.end_value,
                event.sample_count
            );
            emit(event);
        }
    }

    /// Run one raw sample through the pipeline. Invalid samples are skipped.
    pub fn process(&mut self, sample: &RawSample, mut emit: impl FnMut(PressureEvent)) {
        if !sample.is_valid {
            self.stats.samples_skipped = self.stats.samples_skipped.wrapping_add(1);
            return;
        }
        self.stats.samples_processed = self.stats.samples_processed.wrapping_add(1);

        let now = sample.timestamp_ms;
        self.last_timestamp_ms = Some(now);

        let Some(secondary) = self.filter.update(sample.raw_value as f32) else {
            self.detector.start(now);
            return;
        };
        let filtered_value = libm::roundf(secondary) as u32;

        self.window.push(now, secondary);
        self.derivative = self.derivative_filter.update(self.window.derivative());
        let transition = self.detector.update(self.derivative, now);

        match self.detector.state() {
            SignalState::Stable => {
                if transition == Some(Transition::EnteredStable) {
                    self.finish_change(&mut emit);
                }
                self.stable.add(now, filtered_value);
                if self.stable.elapsed_ms(now) >= self.max_stable_ms {
                    self.finish_stable(now, &mut emit);
                }
            }
            SignalState::Changing => {
                if transition == Some(Transition::EnteredChanging) {
                    self.finish_stable(now, &mut emit);
                }
                self.capture.add(PressureSample {
                    timestamp_ms: now,
                    filtered_value,
                    derivative: self.derivative,
                });
                if self.capture.is_full() || self.capture.elapsed_ms(now) >= self.max_changing_ms {
                    self.finish_change(&mut emit);
                }
            }
        }
    }

    /// Close whatever is in progress, e.g. before shutdown or at the end of
    /// a recorded trace.
    pub fn flush(&mut self, mut emit: impl FnMut(PressureEvent)) {
        self.finish_change(&mut emit);
        if let Some(end) = self.last_timestamp_ms {
            self.finish_stable(end, &mut emit);
        }
    }

    pub fn log_stats(&self, dropped: u32, sample_queue: (usize, usize), event_queue: (usize, usize)) {
        let s = &self.stats;
        info!(
            "[Processor] processed={} skipped={} stable_events={} change_events={} dropped={} state={} derivative={:.1} sample_queue={}/{} ({}%) event_queue={}/{} ({}%)",
            s.samples_processed,
            s.samples_skipped,
            s.stable_events,
            s.change_events,
            dropped,
            self.state().label(),
            self.derivative,
            sample_queue.0,
            sample_queue.1,
            fill_percent(sample_queue.0, sample_queue.1),
            event_queue.0,
            event_queue.1,
            fill_percent(event_queue.0, event_queue.1)
        );
    }

    /// Processing loop: every tick, drain the samples queued so far.
    pub async fn run<const S: usize, const E: usize>(
        &mut self,
        samples: &BoundedQueue<RawSample, S>,
        events: &BoundedQueue<PressureEvent, E>,
        ctx: &SystemContext,
        stats_interval_ms: u64,
    ) {
        let mut ticker = Ticker::every(self.tick);
        let mut forwarder = EventForwarder::new(events, ctx);
        let mut stats_timer = StatsTimer::new(stats_interval_ms, Instant::now().as_millis());

        info!("Signal processor started: tick={}ms", self.tick.as_millis());

        loop {
            ticker.next().await;
            if !ctx.is_running(Stage::Processor) {
                continue;
            }

            let pending = samples.len();
            for _ in 0..pending {
                let Some(sample) = samples.try_pop() else {
                    break;
                };
                self.process(&sample, |event| forwarder.forward(event));
            }

            if stats_timer.due(Instant::now().as_millis()) {
                self.log_stats(
                    forwarder.dropped(),
                    (samples.len(), S),
                    (events.len(), E),
                );
            }
        }
    }
}

/// Event sink that never blocks: a full event queue drops the event and
/// tells the lifecycle controller once per overload episode.
pub(crate) struct EventForwarder<'a, const E: usize> {
    queue: &'a BoundedQueue<PressureEvent, E>,
    ctx: &'a SystemContext,
    drops: DropCounter,
}

impl<'a, const E: usize> EventForwarder<'a, E> {
    pub(crate) fn new(queue: &'a BoundedQueue<PressureEvent, E>, ctx: &'a SystemContext) -> Self {
        Self {
            queue,
            ctx,
            drops: DropCounter::new(EVENT_DROP_LOG_INTERVAL),
        }
    }

    pub(crate) fn forward(&mut self, event: PressureEvent) {
        match self.queue.try_push(event) {
            Ok(()) => self.drops.record_delivery(),
            Err(event) => {
                let report = self.drops.record_drop();
                if report.should_log {
                    warn!(
                        "Event queue full, dropped {} event ({} total)",
                        event.kind.label(),
                        report.total
                    );
                }
                if report.onset {
                    self.ctx.notify(LifecycleEvent::QueueFull);
                }
            }
        }
    }

    pub(crate) fn dropped(&self) -> u32 {
        self.drops.total()
    }
}
