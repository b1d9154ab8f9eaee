//! Simulated network link: a logging publisher and the connectivity
//! collaborators that drive the lifecycle controller.

use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use presslink_core::app_state::{LifecycleEvent, Stage, SystemContext, SystemState};
use presslink_core::batching::{LinkStatus, Publisher, Readiness};
use presslink_core::types::QoS;

const POLL: Duration = Duration::from_millis(250);
const CONNECT_DELAY: Duration = Duration::from_millis(800);
const PORTAL_DELAY: Duration = Duration::from_secs(3);

/// Publisher that writes each message to the log instead of a broker.
pub struct LogPublisher {
    status: &'static LinkStatus,
    /// Every n-th send fails; 0 never fails.
    lose_every: u32,
    attempts: u32,
}

impl LogPublisher {
    pub fn new(status: &'static LinkStatus, lose_every: u32) -> Self {
        Self {
            status,
            lose_every,
            attempts: 0,
        }
    }
}

impl Readiness for LogPublisher {
    fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}

impl Publisher for LogPublisher {
    async fn send(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> bool {
        self.attempts = self.attempts.wrapping_add(1);
        if self.lose_every > 0 && self.attempts % self.lose_every == 0 {
            return false;
        }

        info!(
            "PUBLISH {} qos={} retain={} ({} bytes)",
            topic,
            qos.level(),
            retain,
            payload.len()
        );
        match core::str::from_utf8(payload) {
            Ok(json) => debug!("{}", json),
            Err(_) => warn!("Payload is not valid UTF-8"),
        }
        true
    }
}

/// Connectivity collaborators: network join, credential provisioning,
/// transport connect and the configuration portal, each acting only while
/// its stage is enabled.
///
/// `outage_after`, when set, drops the transport that long after each
/// successful connect so the pause/resume path gets exercised.
pub async fn run_connectivity(
    ctx: &SystemContext,
    status: &LinkStatus,
    outage_after: Option<Duration>,
) {
    let mut connected_at: Option<Instant> = None;

    loop {
        Timer::after(POLL).await;

        match ctx.system_state() {
            SystemState::Connecting if ctx.is_running(Stage::NetworkConnect) => {
                Timer::after(CONNECT_DELAY).await;
                info!("Simulated network joined");
                ctx.notify(LifecycleEvent::NetworkUp);
            }
            SystemState::ConnectedNetwork if ctx.is_running(Stage::Provisioning) => {
                status.set_ready(false);
                ctx.notify(LifecycleEvent::CredentialsReady);
            }
            SystemState::ConnectedTransportPending => {
                Timer::after(CONNECT_DELAY).await;
                info!("Simulated transport connected");
                status.set_ready(true);
                connected_at = Some(Instant::now());
                ctx.notify(LifecycleEvent::TransportUp);
            }
            SystemState::ConnectedTransport => {
                let expired = match (outage_after, connected_at) {
                    (Some(after), Some(at)) => at.elapsed() >= after,
                    _ => false,
                };
                if expired {
                    warn!("Simulated transport outage");
                    status.set_ready(false);
                    connected_at = None;
                    ctx.notify(LifecycleEvent::TransportDown);
                }
            }
            SystemState::ConfigMode if ctx.is_running(Stage::ConfigPortal) => {
                Timer::after(PORTAL_DELAY).await;
                info!("Simulated portal saved credentials");
                ctx.notify(LifecycleEvent::NetworkUp);
            }
            _ => {}
        }
    }
}
