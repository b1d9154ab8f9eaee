//! Publisher collaborator and the stage that feeds it.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_time::{Duration, Instant, Timer};
use log::{info, warn};

use crate::app_state::{Stage, SystemContext};
use crate::queue::BoundedQueue;
use crate::stats::{StatsTimer, fill_percent};
use crate::types::{OutboundMessage, QoS};

/// Whether the transport can currently accept messages.
pub trait Readiness {
    fn is_ready(&self) -> bool;
}

/// Network transport that delivers outbound messages.
pub trait Publisher: Readiness {
    /// Send one message. `false` means the message was lost; there is no
    /// retry at this layer.
    fn send(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> impl Future<Output = bool>;
}

/// Readiness flag shared between the transport and the stages that gate
/// on it.
#[derive(Debug, Default)]
pub struct LinkStatus {
    ready: AtomicBool,
}

impl LinkStatus {
    pub const fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl Readiness for LinkStatus {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub sent: u32,
    pub lost: u32,
}

/// Drains the outbound message queue into a [`Publisher`].
pub struct MessageForwarder<P> {
    publisher: P,
    poll: Duration,
    stats: PublisherStats,
}

impl<P: Publisher> MessageForwarder<P> {
    pub fn new(publisher: P, poll_ms: u64) -> Self {
        Self {
            publisher,
            poll: Duration::from_millis(poll_ms),
            stats: PublisherStats::default(),
        }
    }

    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Hand one message to the publisher and account for the outcome.
    pub async fn deliver(&mut self, message: &OutboundMessage) -> bool {
        let sent = self
            .publisher
            .send(&message.topic, &message.payload, message.qos, message.retain)
            .await;
        if sent {
            self.stats.sent = self.stats.sent.wrapping_add(1);
        } else {
            self.stats.lost = self.stats.lost.wrapping_add(1);
            warn!(
                "Publish to {} failed, message lost ({} total)",
                message.topic, self.stats.lost
            );
        }
        sent
    }

    pub async fn run<const M: usize>(
        &mut self,
        messages: &BoundedQueue<OutboundMessage, M>,
        ctx: &SystemContext,
        stats_interval_ms: u64,
    ) {
        let mut stats_timer = StatsTimer::new(stats_interval_ms, Instant::now().as_millis());
        info!("Message forwarder started");

        loop {
            if !ctx.is_running(Stage::Publisher) || !self.publisher.is_ready() {
                Timer::after(self.poll).await;
                continue;
            }

            if let Some(message) = messages.pop_timeout(self.poll).await {
                self.deliver(&message).await;
            }

            if stats_timer.due(Instant::now().as_millis()) {
                info!(
                    "[Publisher] sent={} lost={} queue={}/{} ({}%)",
                    self.stats.sent,
                    self.stats.lost,
                    messages.len(),
                    M,
                    fill_percent(messages.len(), M)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;
    use alloc::vec::Vec;
    use embassy_futures::block_on;

    struct RecordingPublisher {
        ready: bool,
        accept: bool,
        sent: Vec<(String, usize, u8)>,
    }

    impl Readiness for RecordingPublisher {
        fn is_ready(&self) -> bool {
            self.ready
        }
    }

    impl Publisher for RecordingPublisher {
        async fn send(&mut self, topic: &str, payload: &[u8], qos: QoS, _retain: bool) -> bool {
            if self.accept {
                self.sent.push((String::from(topic), payload.len(), qos.level()));
            }
            self.accept
        }
    }

    fn message() -> OutboundMessage {
        let mut topic = heapless::String::new();
        topic.push_str("telemetry/gateway/gw/pressure-events").unwrap();
        OutboundMessage {
            topic,
            payload: heapless::Vec::from_slice(b"{\"events\":[]}").unwrap(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    #[test]
    fn test_delivered_message_reaches_publisher() {
        let publisher = RecordingPublisher {
            ready: true,
            accept: true,
            sent: Vec::new(),
        };
        let mut forwarder = MessageForwarder::new(publisher, 1000);

        assert!(block_on(forwarder.deliver(&message())));
        assert_eq!(forwarder.stats().sent, 1);
        assert_eq!(
            forwarder.publisher().sent[0],
            (String::from("telemetry/gateway/gw/pressure-events"), 13, 0)
        );
    }

    #[test]
    fn test_rejected_send_counts_as_loss() {
        let publisher = RecordingPublisher {
            ready: true,
            accept: false,
            sent: Vec::new(),
        };
        let mut forwarder = MessageForwarder::new(publisher, 1000);

        assert!(!block_on(forwarder.deliver(&message())));
        assert_eq!(forwarder.stats().lost, 1);
        assert_eq!(forwarder.stats().sent, 0);
    }

    #[test]
    fn test_link_status_toggles() {
        let link = LinkStatus::new();
        assert!(!link.is_ready());
        link.set_ready(true);
        assert!(link.is_ready());
    }
}
