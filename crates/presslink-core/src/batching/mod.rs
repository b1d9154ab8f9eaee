//! Message Batcher and publisher hand-off

mod batcher;
mod publish;
mod wire;

pub use batcher::{BatcherStats, FormatError, MessageBatcher};
pub use publish::{LinkStatus, MessageForwarder, Publisher, PublisherStats, Readiness};
pub use wire::{
    BASE_MESSAGE_ESTIMATE, CHANGE_EVENT_ESTIMATE, PER_SAMPLE_ESTIMATE, STABLE_EVENT_ESTIMATE,
    estimate_event_size, serialized_sample_count,
};
