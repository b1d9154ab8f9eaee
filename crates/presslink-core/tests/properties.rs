//! Property tests for queue, batching, hysteresis and lifecycle invariants.

use presslink_core::app_state::{LifecycleController, LifecycleEvent, SystemContext};
use presslink_core::batching::MessageBatcher;
use presslink_core::config::{BatchingConfig, LifecycleConfig, MAX_PAYLOAD_LEN};
use presslink_core::processing::HysteresisDetector;
use presslink_core::queue::{BoundedQueue, DropCounter};
use presslink_core::types::{
    EventKind, PressureEvent, PressureSample, SampleBuffer, TriggerReason,
};
use proptest::prelude::*;

const THRESHOLD: f32 = 120_000.0;

fn event_strategy() -> impl Strategy<Value = PressureEvent> {
    (any::<bool>(), 1u32..=100, 0u64..1_000_000).prop_map(|(stable, count, start)| {
        if stable {
            return PressureEvent {
                start_timestamp_ms: start,
                end_timestamp_ms: start + count as u64 * 10,
                kind: EventKind::Stable,
                start_value: 3_000_000,
                end_value: 3_000_000,
                sample_count: count,
                trigger: TriggerReason::Timeout,
                samples: SampleBuffer::new(),
            };
        }
        let mut samples = SampleBuffer::new();
        for i in 0..count as u64 {
            samples
                .push(PressureSample {
                    timestamp_ms: start + i * 10,
                    filtered_value: 16_000_000 - i as u32,
                    derivative: -999_999.9,
                })
                .unwrap();
        }
        PressureEvent {
            start_timestamp_ms: start,
            end_timestamp_ms: start + (count as u64 - 1) * 10,
            kind: EventKind::Falling,
            start_value: 16_000_000,
            end_value: 16_000_000 - (count - 1),
            sample_count: count,
            trigger: TriggerReason::DerivativeFalling,
            samples,
        }
    })
}

fn lifecycle_event_strategy() -> impl Strategy<Value = LifecycleEvent> {
    prop_oneof![
        Just(LifecycleEvent::NetworkUp),
        Just(LifecycleEvent::NetworkDown),
        Just(LifecycleEvent::NetworkConnectFailed),
        Just(LifecycleEvent::NoStoredCredentials),
        Just(LifecycleEvent::CredentialsReady),
        Just(LifecycleEvent::TransportUp),
        Just(LifecycleEvent::TransportDown),
        Just(LifecycleEvent::ConfigureRequested),
        Just(LifecycleEvent::UpdateRequested),
        Just(LifecycleEvent::QueueFull),
        Just(LifecycleEvent::BusRecovered),
        Just(LifecycleEvent::Fault),
    ]
}

proptest! {
    #[test]
    fn fifo_order_is_preserved(values in prop::collection::vec(any::<u32>(), 0..64)) {
        let queue: BoundedQueue<u32, 64> = BoundedQueue::new();
        for v in &values {
            prop_assert!(queue.try_push(*v).is_ok());
        }
        let drained: Vec<u32> = std::iter::from_fn(|| queue.try_pop()).collect();
        prop_assert_eq!(drained, values);
    }

    #[test]
    fn drops_equal_overflow(produced in 0u32..500, drain_every in 1u32..10) {
        let queue: BoundedQueue<u32, 16> = BoundedQueue::new();
        let mut drops = DropCounter::new(100);
        let mut consumed = 0;
        for i in 0..produced {
            if queue.try_push(i).is_err() {
                drops.record_drop();
            } else {
                drops.record_delivery();
            }
            if i % drain_every == 0 && queue.try_pop().is_some() {
                consumed += 1;
            }
        }
        prop_assert_eq!(drops.total(), produced - consumed - queue.len() as u32);
    }

    #[test]
    fn payload_never_exceeds_buffer(events in prop::collection::vec(event_strategy(), 1..40)) {
        let mut batcher = MessageBatcher::new(&BatchingConfig::default(), 0).unwrap();
        let mut payloads = Vec::new();
        let mut accepted = 0;

        for event in events.iter().cloned() {
            if let Err(event) = batcher.offer(event) {
                payloads.extend(batcher.flush(0).unwrap());
                prop_assert!(batcher.offer(event).is_ok());
            }
            accepted += 1;
        }
        payloads.extend(batcher.flush(0).unwrap());

        let mut serialized = 0;
        for message in &payloads {
            prop_assert!(message.payload.len() <= MAX_PAYLOAD_LEN);
            let json: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
            serialized += json["events"].as_array().unwrap().len();
        }
        prop_assert_eq!(serialized, accepted);
    }

    #[test]
    fn dead_band_never_chatters(band in prop::collection::vec(0.81f32..1.5, 1..200)) {
        let mut detector = HysteresisDetector::new(THRESHOLD, 0.8, 50);
        detector.start(0);
        prop_assert!(detector.update(1.01 * THRESHOLD, 10).is_some());
        for (i, factor) in band.iter().enumerate() {
            let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
            let t = 20 + i as u64 * 10;
            prop_assert!(detector.update(sign * factor * THRESHOLD, t).is_none());
        }
    }

    #[test]
    fn run_plan_reapplication_is_idempotent(
        events in prop::collection::vec(lifecycle_event_strategy(), 0..20)
    ) {
        let ctx = SystemContext::new();
        let mut controller = LifecycleController::new(&ctx, &LifecycleConfig::default());
        for event in events {
            ctx.notify(event);
        }
        controller.tick();
        let state = ctx.system_state();
        let plan = ctx.run_plan();

        controller.tick();
        prop_assert_eq!(controller.apply_plan(), 0);
        prop_assert_eq!(ctx.system_state(), state);
        prop_assert_eq!(ctx.run_plan(), plan);
    }
}
