//! JSON wire records for outbound pressure-event batches.
//!
//! ```json
//! {"sensor_id":"gw-1","sentTimestamp":5012,"events":[
//!   {"type":"stable","startTimestamp":10,"endTimestamp":4010,"sampleCount":400,"duration_ms":4000,"pressure":3450120},
//!   {"type":"rising","startTimestamp":4020,"endTimestamp":4300,"sampleCount":29,"duration_ms":280,
//!    "startValue":3450200,"endValue":3601544,"triggerReason":"derivative_rising","samples":[[4020,3450200],...]}
//! ]}
//! ```

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::config::MAX_EVENTS_PER_BATCH;
use crate::types::{EventKind, PressureEvent, PressureSample};

/// Envelope overhead of one message.
pub const BASE_MESSAGE_ESTIMATE: usize = 200;
/// Serialized size of a stable record.
pub const STABLE_EVENT_ESTIMATE: usize = 150;
/// Serialized size of a change record without samples.
pub const CHANGE_EVENT_ESTIMATE: usize = 200;
/// Serialized size of one `[timestamp, value]` pair.
pub const PER_SAMPLE_ESTIMATE: usize = 25;

/// Number of detailed samples that will actually be written for `event`.
///
/// Stable records never carry samples. Change records carry them only when
/// the total sample count is within `max_json_samples`.
pub fn serialized_sample_count(event: &PressureEvent, max_json_samples: u32) -> usize {
    if event.kind == EventKind::Stable
        || !event.has_detailed_samples()
        || event.sample_count > max_json_samples
    {
        0
    } else {
        event.samples.len()
    }
}

/// Conservative size estimate of one event record.
pub fn estimate_event_size(event: &PressureEvent, max_json_samples: u32) -> usize {
    if event.kind == EventKind::Stable {
        STABLE_EVENT_ESTIMATE
    } else {
        CHANGE_EVENT_ESTIMATE
            + serialized_sample_count(event, max_json_samples) * PER_SAMPLE_ESTIMATE
    }
}

/// Detailed samples written as `[[timestamp, value], ...]`.
pub struct SampleSeries<'a>(&'a [PressureSample]);

impl Serialize for SampleSeries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for sample in self.0 {
            seq.serialize_element(&(sample.timestamp_ms, sample.filtered_value))?;
        }
        seq.end()
    }
}

#[derive(serde::Serialize)]
pub struct StableRecord {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "startTimestamp")]
    start_timestamp: u64,
    #[serde(rename = "endTimestamp")]
    end_timestamp: u64,
    #[serde(rename = "sampleCount")]
    sample_count: u32,
    duration_ms: u64,
    pressure: u32,
}

#[derive(serde::Serialize)]
pub struct ChangeRecord<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "startTimestamp")]
    start_timestamp: u64,
    #[serde(rename = "endTimestamp")]
    end_timestamp: u64,
    #[serde(rename = "sampleCount")]
    sample_count: u32,
    duration_ms: u64,
    #[serde(rename = "startValue")]
    start_value: u32,
    #[serde(rename = "endValue")]
    end_value: u32,
    #[serde(rename = "triggerReason")]
    trigger_reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    samples: Option<SampleSeries<'a>>,
}

#[derive(serde::Serialize)]
#[serde(untagged)]
pub enum WireEvent<'a> {
    Stable(StableRecord),
    Change(ChangeRecord<'a>),
}

impl<'a> WireEvent<'a> {
    pub fn from_event(event: &'a PressureEvent, max_json_samples: u32) -> Self {
        if event.kind == EventKind::Stable {
            let pressure = ((event.start_value as u64 + event.end_value as u64) / 2) as u32;
            return Self::Stable(StableRecord {
                kind: event.kind.label(),
                start_timestamp: event.start_timestamp_ms,
                end_timestamp: event.end_timestamp_ms,
                sample_count: event.sample_count,
                duration_ms: event.duration_ms(),
                pressure,
            });
        }

        let included = serialized_sample_count(event, max_json_samples);
        Self::Change(ChangeRecord {
            kind: event.kind.label(),
            start_timestamp: event.start_timestamp_ms,
            end_timestamp: event.end_timestamp_ms,
            sample_count: event.sample_count,
            duration_ms: event.duration_ms(),
            start_value: event.start_value,
            end_value: event.end_value,
            trigger_reason: event.trigger.label(),
            samples: (included > 0).then(|| SampleSeries(&event.samples[..included])),
        })
    }
}

#[derive(serde::Serialize)]
pub struct WireBatch<'a> {
    pub sensor_id: &'a str,
    #[serde(rename = "sentTimestamp")]
    pub sent_timestamp: u64,
    pub events: heapless::Vec<WireEvent<'a>, MAX_EVENTS_PER_BATCH>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SampleBuffer, TriggerReason};
    use alloc::string::String;

    fn change_event(sample_count: u32) -> PressureEvent {
        let mut samples = SampleBuffer::new();
        for i in 0..sample_count.min(100) as u64 {
            let _ = samples.push(PressureSample {
                timestamp_ms: 1000 + i * 10,
                filtered_value: 3_000_000 + i as u32,
                derivative: 200_000.0,
            });
        }
        PressureEvent {
            start_timestamp_ms: 1000,
            end_timestamp_ms: 1000 + (sample_count as u64 - 1) * 10,
            kind: EventKind::Rising,
            start_value: 3_000_000,
            end_value: 3_000_000 + sample_count - 1,
            sample_count,
            trigger: TriggerReason::DerivativeRising,
            samples,
        }
    }

    fn to_json(event: &PressureEvent) -> String {
        let bytes = serde_json::to_vec(&WireEvent::from_event(event, 50)).unwrap();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_stable_record_reports_average_pressure() {
        let event = PressureEvent {
            start_timestamp_ms: 10,
            end_timestamp_ms: 4010,
            kind: EventKind::Stable,
            start_value: 3_450_120,
            end_value: 3_450_120,
            sample_count: 400,
            trigger: TriggerReason::Timeout,
            samples: SampleBuffer::new(),
        };
        assert_eq!(
            to_json(&event),
            r#"{"type":"stable","startTimestamp":10,"endTimestamp":4010,"sampleCount":400,"duration_ms":4000,"pressure":3450120}"#
        );
    }

    #[test]
    fn test_small_change_includes_sample_pairs() {
        let json = to_json(&change_event(2));
        assert_eq!(
            json,
            r#"{"type":"rising","startTimestamp":1000,"endTimestamp":1010,"sampleCount":2,"duration_ms":10,"startValue":3000000,"endValue":3000001,"triggerReason":"derivative_rising","samples":[[1000,3000000],[1010,3000001]]}"#
        );
    }

    #[test]
    fn test_sample_cap_is_inclusive() {
        assert!(to_json(&change_event(50)).contains("\"samples\""));
        assert!(!to_json(&change_event(51)).contains("\"samples\""));
        assert_eq!(serialized_sample_count(&change_event(51), 50), 0);
    }

    #[test]
    fn test_estimates_follow_serialized_content() {
        assert_eq!(estimate_event_size(&change_event(10), 50), 200 + 10 * 25);
        // 100 collected samples are not serialized, so not counted
        assert_eq!(estimate_event_size(&change_event(100), 50), 200);
    }
}
