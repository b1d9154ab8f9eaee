use core::fmt::Write;

use embassy_time::{Duration, Instant, Ticker, Timer};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use super::publish::Readiness;
use super::wire::{BASE_MESSAGE_ESTIMATE, WireBatch, WireEvent, estimate_event_size};
use crate::app_state::{Stage, SystemContext, SystemState};
use crate::config::{BatchingConfig, MAX_EVENTS_PER_BATCH, MAX_PAYLOAD_LEN, MAX_TOPIC_LEN};
use crate::queue::BoundedQueue;
use crate::stats::{StatsTimer, fill_percent};
use crate::types::{OutboundMessage, PressureEvent, QoS};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("JSON serialization failed")]
    Serialize,
    #[error("payload of {len} bytes exceeds the {limit} byte buffer")]
    PayloadTooLarge { len: usize, limit: usize },
    #[error("topic exceeds {limit} bytes")]
    TopicTooLong { limit: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatcherStats {
    pub events_consumed: u32,
    pub malformed_events: u32,
    pub messages_formatted: u32,
    pub serialization_errors: u32,
    pub dropped_messages: u32,
}

/// Packs events into size- and time-bounded outbound messages.
///
/// A batch is flushed when it holds `max_events_per_message` events or
/// `flush_timeout_ms` has passed since the previous flush. Before an event
/// joins a batch its serialized size is estimated; an event that would
/// push the estimate past the payload ceiling is refused so the caller can
/// flush first. Serialization therefore never has to truncate.
pub struct MessageBatcher {
    batch: heapless::Vec<PressureEvent, MAX_EVENTS_PER_BATCH>,
    max_events: usize,
    estimated_size: usize,
    payload_ceiling: usize,
    max_json_samples: u32,
    flush_timeout_ms: u64,
    last_flush_ms: u64,
    sensor_id: heapless::String<MAX_TOPIC_LEN>,
    topic: heapless::String<MAX_TOPIC_LEN>,
    qos: QoS,
    tick: Duration,
    send_timeout: Duration,
    pause_poll: Duration,
    stats: BatcherStats,
}

impl MessageBatcher {
    pub fn new(config: &BatchingConfig, now_ms: u64) -> Result<Self, FormatError> {
        let limit = MAX_TOPIC_LEN;
        let mut topic = heapless::String::new();
        write!(
            topic,
            "{}/{}/pressure-events",
            config.topic_prefix, config.sensor_id
        )
        .map_err(|_| FormatError::TopicTooLong { limit })?;
        let mut sensor_id = heapless::String::new();
        sensor_id
            .push_str(&config.sensor_id)
            .map_err(|_| FormatError::TopicTooLong { limit })?;

        Ok(Self {
            batch: heapless::Vec::new(),
            max_events: config.max_events_per_message.clamp(1, MAX_EVENTS_PER_BATCH),
            estimated_size: BASE_MESSAGE_ESTIMATE,
            payload_ceiling: config.payload_ceiling.min(MAX_PAYLOAD_LEN),
            max_json_samples: config.max_json_samples,
            flush_timeout_ms: config.flush_timeout_ms,
            last_flush_ms: now_ms,
            sensor_id,
            topic,
            qos: QoS::from_level(config.qos),
            tick: Duration::from_millis(config.batcher_tick_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
            pause_poll: Duration::from_millis(config.pause_poll_ms),
            stats: BatcherStats::default(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> &BatcherStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.batch.len() >= self.max_events
    }

    /// Running size estimate of the current batch in bytes.
    pub fn estimated_size(&self) -> usize {
        self.estimated_size
    }

    /// Add an event to the current batch.
    ///
    /// The event is handed back if the batch is full or the size estimate
    /// would cross the payload ceiling. An empty batch always accepts.
    pub fn offer(&mut self, event: PressureEvent) -> Result<(), PressureEvent> {
        if self.is_full() {
            return Err(event);
        }
        let size = estimate_event_size(&event, self.max_json_samples);
        if !self.batch.is_empty() && self.estimated_size + size > self.payload_ceiling {
            return Err(event);
        }
        self.batch.push(event)?;
        self.estimated_size += size;
        Ok(())
    }

    /// Whether the batch should be sent now.
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.batch.is_empty()
            && (self.is_full() || now_ms.saturating_sub(self.last_flush_ms) >= self.flush_timeout_ms)
    }

    /// Serialize the current batch and start a new one.
    ///
    /// The batch is discarded even when serialization fails; it is never
    /// partially sent.
    pub fn flush(&mut self, now_ms: u64) -> Result<Option<OutboundMessage>, FormatError> {
        if self.batch.is_empty() {
            self.last_flush_ms = now_ms;
            return Ok(None);
        }

        let result = self.serialize(now_ms);
        self.batch.clear();
        self.estimated_size = BASE_MESSAGE_ESTIMATE;
        self.last_flush_ms = now_ms;

        match result {
            Ok(message) => {
                self.stats.messages_formatted = self.stats.messages_formatted.wrapping_add(1);
                Ok(Some(message))
            }
            Err(e) => {
                self.stats.serialization_errors = self.stats.serialization_errors.wrapping_add(1);
                Err(e)
            }
        }
    }

    fn serialize(&self, now_ms: u64) -> Result<OutboundMessage, FormatError> {
        let mut events = heapless::Vec::new();
        for event in &self.batch {
            // Same capacity as the batch itself
            let _ = events.push(WireEvent::from_event(event, self.max_json_samples));
        }
        let document = WireBatch {
            sensor_id: &self.sensor_id,
            sent_timestamp: now_ms,
            events,
        };

        let bytes = serde_json::to_vec(&document).map_err(|e| {
            error!("Batch serialization failed: {}", e);
            FormatError::Serialize
        })?;
        let payload = heapless::Vec::from_slice(&bytes).map_err(|_| FormatError::PayloadTooLarge {
            len: bytes.len(),
            limit: MAX_PAYLOAD_LEN,
        })?;

        debug!(
            "Formatted {} events into {} bytes (estimate {})",
            self.batch.len(),
            bytes.len(),
            self.estimated_size
        );

        Ok(OutboundMessage {
            topic: self.topic.clone(),
            payload,
            qos: self.qos,
            retain: false,
        })
    }

    /// Record one event taken off the event queue and add it to the batch,
    /// flushing first if it does not fit.
    async fn accept<const M: usize>(
        &mut self,
        event: PressureEvent,
        messages: &BoundedQueue<OutboundMessage, M>,
        now_ms: u64,
    ) {
        self.stats.events_consumed = self.stats.events_consumed.wrapping_add(1);
        if !event.is_well_formed() {
            self.stats.malformed_events = self.stats.malformed_events.wrapping_add(1);
            warn!(
                "Discarding malformed {} event ({}-{} ms, {} samples)",
                event.kind.label(),
                event.start_timestamp_ms,
                event.end_timestamp_ms,
                event.sample_count
            );
            return;
        }
        if let Err(event) = self.offer(event) {
            self.flush_and_send(messages, now_ms).await;
            // An empty batch always accepts
            let _ = self.offer(event);
        }
        if self.is_full() {
            self.flush_and_send(messages, now_ms).await;
        }
    }

    async fn flush_and_send<const M: usize>(
        &mut self,
        messages: &BoundedQueue<OutboundMessage, M>,
        now_ms: u64,
    ) {
        let count = self.batch.len();
        match self.flush(now_ms) {
            Ok(Some(message)) => {
                let bytes = message.payload.len();
                if messages.push_timeout(message, self.send_timeout).await {
                    info!("Queued {} events for publishing ({} bytes)", count, bytes);
                } else {
                    self.stats.dropped_messages = self.stats.dropped_messages.wrapping_add(1);
                    warn!(
                        "Outbound queue full, message dropped ({} total)",
                        self.stats.dropped_messages
                    );
                }
            }
            Ok(None) => {}
            Err(e) => error!("Dropping batch of {} events: {}", count, e),
        }
    }

    pub fn log_stats(&self, event_queue: (usize, usize), message_queue: (usize, usize)) {
        let s = &self.stats;
        info!(
            "[Batcher] events={} malformed={} messages={} errors={} dropped={} event_queue={}/{} ({}%) message_queue={}/{} ({}%)",
            s.events_consumed,
            s.malformed_events,
            s.messages_formatted,
            s.serialization_errors,
            s.dropped_messages,
            event_queue.0,
            event_queue.1,
            fill_percent(event_queue.0, event_queue.1),
            message_queue.0,
            message_queue.1,
            fill_percent(message_queue.0, message_queue.1)
        );
    }

    /// Batching loop.
    ///
    /// The event queue is only drained while the transport is connected and
    /// `link` reports ready; otherwise the stage idles and lets events wait
    /// upstream.
    pub async fn run<L: Readiness, const E: usize, const M: usize>(
        &mut self,
        events: &BoundedQueue<PressureEvent, E>,
        messages: &BoundedQueue<OutboundMessage, M>,
        ctx: &SystemContext,
        link: &L,
        stats_interval_ms: u64,
    ) {
        let mut ticker = Ticker::every(self.tick);
        let mut stats_timer = StatsTimer::new(stats_interval_ms, Instant::now().as_millis());

        info!("Message batcher started: topic={}", self.topic);

        loop {
            let connected = ctx.system_state() == SystemState::ConnectedTransport;
            if !ctx.is_running(Stage::Batcher) || !connected || !link.is_ready() {
                Timer::after(self.pause_poll).await;
                ticker.reset();
                continue;
            }

            let now_ms = Instant::now().as_millis();
            while let Some(event) = events.try_pop() {
                self.accept(event, messages, now_ms).await;
            }
            if self.is_due(now_ms) {
                self.flush_and_send(messages, now_ms).await;
            }

            if stats_timer.due(now_ms) {
                self.log_stats((events.len(), E), (messages.len(), M));
            }
            ticker.next().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, PressureSample, SampleBuffer, TriggerReason};

    fn config() -> BatchingConfig {
        BatchingConfig::default()
    }

    fn stable_event(start: u64) -> PressureEvent {
        PressureEvent {
            start_timestamp_ms: start,
            end_timestamp_ms: start + 1000,
            kind: EventKind::Stable,
            start_value: 3_000_000,
            end_value: 3_000_000,
            sample_count: 100,
            trigger: TriggerReason::Timeout,
            samples: SampleBuffer::new(),
        }
    }

    fn change_event(sample_count: u32) -> PressureEvent {
        let mut samples = SampleBuffer::new();
        for i in 0..sample_count as u64 {
            let _ = samples.push(PressureSample {
                timestamp_ms: 2000 + i * 10,
                filtered_value: 3_000_000 + i as u32 * 5000,
                derivative: 500_000.0,
            });
        }
        PressureEvent {
            start_timestamp_ms: 2000,
            end_timestamp_ms: 2000 + (sample_count as u64 - 1) * 10,
            kind: EventKind::Rising,
            start_value: 3_000_000,
            end_value: 3_000_000 + (sample_count - 1) * 5000,
            sample_count,
            trigger: TriggerReason::DerivativeRising,
            samples,
        }
    }

    #[test]
    fn test_topic_layout() {
        let batcher = MessageBatcher::new(&config(), 0).unwrap();
        assert_eq!(batcher.topic(), "telemetry/gateway/gateway-0001/pressure-events");
    }

    #[test]
    fn test_full_change_event_drops_samples_but_keeps_metadata() {
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        assert!(batcher.offer(change_event(100)).is_ok());

        let message = batcher.flush(5000).unwrap().unwrap();
        let json = message.payload_str().unwrap();
        assert!(json.contains("\"type\":\"rising\""));
        assert!(json.contains("\"triggerReason\":\"derivative_rising\""));
        assert!(json.contains("\"sampleCount\":100"));
        assert!(!json.contains("\"samples\""));
        assert!(json.starts_with("{\"sensor_id\":\"gateway-0001\",\"sentTimestamp\":5000,"));
        assert!(message.payload.len() <= MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_batch_closes_at_max_events() {
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        for i in 0..5 {
            assert!(batcher.offer(stable_event(i * 1000)).is_ok());
        }
        assert!(batcher.is_full());
        assert!(batcher.is_due(1));
        assert!(batcher.offer(stable_event(9000)).is_err());
    }

    #[test]
    fn test_size_estimate_refuses_overflowing_event() {
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        // Each 50-sample change event is estimated at 200 + 50 * 25 = 1450 bytes
        assert!(batcher.offer(change_event(50)).is_ok());
        assert!(batcher.offer(change_event(50)).is_ok());
        assert_eq!(batcher.estimated_size(), 200 + 2 * 1450);
        assert!(batcher.offer(change_event(50)).is_err());
        // A stable record still fits under the 3584 byte ceiling
        assert!(batcher.offer(stable_event(0)).is_ok());
    }

    #[test]
    fn test_flush_due_after_timeout() {
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        assert!(!batcher.is_due(5000));
        batcher.offer(stable_event(0)).unwrap();
        assert!(!batcher.is_due(999));
        assert!(batcher.is_due(1000));

        let message = batcher.flush(1000).unwrap();
        assert!(message.is_some());
        assert!(batcher.is_empty());
        assert!(!batcher.is_due(1500));
        assert_eq!(batcher.stats().messages_formatted, 1);
    }

    #[test]
    fn test_flush_of_empty_batch_yields_nothing() {
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        assert_eq!(batcher.flush(10), Ok(None));
    }

    #[test]
    fn test_malformed_event_is_discarded() {
        let messages: BoundedQueue<OutboundMessage, 2> = BoundedQueue::new();
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        let mut event = stable_event(5000);
        event.end_timestamp_ms = 1000;

        embassy_futures::block_on(batcher.accept(event, &messages, 0));
        assert!(batcher.is_empty());
        assert_eq!(batcher.stats().events_consumed, 1);
        assert_eq!(batcher.stats().malformed_events, 1);
        assert!(messages.is_empty());
    }

    #[test]
    fn test_refused_event_flushes_then_joins_new_batch() {
        let messages: BoundedQueue<OutboundMessage, 2> = BoundedQueue::new();
        let mut batcher = MessageBatcher::new(&config(), 0).unwrap();
        for _ in 0..3 {
            embassy_futures::block_on(batcher.accept(change_event(50), &messages, 10));
        }

        // The third event did not fit next to the first two
        assert_eq!(messages.len(), 1);
        assert_eq!(batcher.len(), 1);
        let json: serde_json::Value =
            serde_json::from_slice(&messages.try_pop().unwrap().payload).unwrap();
        assert_eq!(json["events"].as_array().map(|e| e.len()), Some(2));
    }

    mod stage {
        use super::*;
        use crate::app_state::{LifecycleController, LifecycleEvent};
        use crate::batching::LinkStatus;
        use crate::config::LifecycleConfig;
        use embassy_time::with_timeout;

        const CONNECTED: [LifecycleEvent; 3] = [
            LifecycleEvent::NetworkUp,
            LifecycleEvent::CredentialsReady,
            LifecycleEvent::TransportUp,
        ];

        fn context_in(events: &[LifecycleEvent]) -> SystemContext {
            let ctx = SystemContext::new();
            {
                let mut controller = LifecycleController::new(&ctx, &LifecycleConfig::default());
                for event in events {
                    controller.handle_event(*event);
                }
                controller.apply_plan();
            }
            ctx
        }

        fn run_for(
            batcher: &mut MessageBatcher,
            events: &BoundedQueue<PressureEvent, 8>,
            messages: &BoundedQueue<OutboundMessage, 2>,
            ctx: &SystemContext,
            link: &LinkStatus,
        ) {
            let _ = embassy_futures::block_on(with_timeout(
                Duration::from_millis(100),
                batcher.run(events, messages, ctx, link, 30_000),
            ));
        }

        fn queued_events() -> BoundedQueue<PressureEvent, 8> {
            let events = BoundedQueue::new();
            for i in 0..5 {
                let _ = events.try_push(stable_event(i * 1000));
            }
            events
        }

        #[test]
        fn test_run_batches_while_connected_and_ready() {
            let ctx = context_in(&CONNECTED);
            let link = LinkStatus::new();
            link.set_ready(true);
            let events = queued_events();
            let messages = BoundedQueue::new();
            let mut batcher = MessageBatcher::new(&config(), 0).unwrap();

            run_for(&mut batcher, &events, &messages, &ctx, &link);

            assert!(events.is_empty());
            assert_eq!(messages.len(), 1);
            assert_eq!(batcher.stats().events_consumed, 5);
        }

        #[test]
        fn test_run_pauses_until_transport_connected() {
            // Transport pending: source and processor run, batcher does not
            let ctx = context_in(&CONNECTED[..2]);
            let link = LinkStatus::new();
            link.set_ready(true);
            let events = queued_events();
            let messages = BoundedQueue::new();
            let mut batcher = MessageBatcher::new(&config(), 0).unwrap();

            run_for(&mut batcher, &events, &messages, &ctx, &link);

            assert_eq!(events.len(), 5);
            assert!(messages.is_empty());
            assert_eq!(batcher.stats().events_consumed, 0);
        }

        #[test]
        fn test_run_pauses_while_link_not_ready() {
            let ctx = context_in(&CONNECTED);
            let link = LinkStatus::new();
            let events = queued_events();
            let messages = BoundedQueue::new();
            let mut batcher = MessageBatcher::new(&config(), 0).unwrap();

            run_for(&mut batcher, &events, &messages, &ctx, &link);

            assert_eq!(events.len(), 5);
            assert!(messages.is_empty());
        }
    }
}
