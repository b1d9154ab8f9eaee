//! Lifecycle Controller
//!
//! Owns the [`SystemState`] and decides which stages may run. Every tick it
//! drains pending notifications, applies at most one table-driven
//! transition per notification, and then re-applies the run plan for the
//! resulting state. Re-applying the plan every tick is idempotent, so a lost
//! or duplicated notification never leaves a stage stuck in the wrong run
//! state.

use embassy_time::{Duration, Timer};
use log::{debug, error, info, warn};

use super::{SystemContext, SystemState};
use crate::config::LifecycleConfig;

/// Notifications delivered to the controller by stages and collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    NetworkUp,
    NetworkDown,
    NetworkConnectFailed,
    NoStoredCredentials,
    CredentialsReady,
    TransportUp,
    TransportDown,
    /// Operator long-press. Forces configuration mode from any state.
    ConfigureRequested,
    UpdateRequested,
    QueueFull,
    BusRecovered,
    Fault,
}

impl LifecycleEvent {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NetworkUp => "network-up",
            Self::NetworkDown => "network-down",
            Self::NetworkConnectFailed => "network-connect-failed",
            Self::NoStoredCredentials => "no-stored-credentials",
            Self::CredentialsReady => "credentials-ready",
            Self::TransportUp => "transport-up",
            Self::TransportDown => "transport-down",
            Self::ConfigureRequested => "configure-requested",
            Self::UpdateRequested => "update-requested",
            Self::QueueFull => "queue-full",
            Self::BusRecovered => "bus-recovered",
            Self::Fault => "fault",
        }
    }

    /// Anomaly reports that never change state.
    pub const fn is_informational(&self) -> bool {
        matches!(
            self,
            Self::QueueFull | Self::BusRecovered | Self::NetworkConnectFailed
        )
    }
}

/// Transition table. `None` means the event has no effect in `state`.
pub fn transition(state: SystemState, event: LifecycleEvent) -> Option<SystemState> {
    use LifecycleEvent as E;
    use SystemState as S;

    match event {
        E::ConfigureRequested => return (state != S::ConfigMode).then_some(S::ConfigMode),
        E::Fault => return (state != S::Error).then_some(S::Error),
        _ => {}
    }

    match (state, event) {
        (S::Connecting, E::NetworkUp) => Some(S::ConnectedNetwork),
        (S::Connecting, E::NoStoredCredentials) => Some(S::ConfigMode),

        (S::ConnectedNetwork, E::CredentialsReady) => Some(S::ConnectedTransportPending),
        (S::ConnectedNetwork, E::NetworkDown) => Some(S::Connecting),

        (S::ConnectedTransportPending, E::TransportUp) => Some(S::ConnectedTransport),
        (S::ConnectedTransportPending, E::NetworkDown) => Some(S::Connecting),

        (S::ConnectedTransport, E::TransportDown) => Some(S::ConnectedNetwork),
        (S::ConnectedTransport, E::NetworkDown) => Some(S::Connecting),
        (S::ConnectedTransport, E::UpdateRequested) => Some(S::UpdateMode),

        (S::ConfigMode, E::NetworkUp) => Some(S::ConnectedNetwork),

        _ => None,
    }
}

/// Stages and collaborators whose run state the controller manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Source,
    Processor,
    Batcher,
    Publisher,
    NetworkConnect,
    Provisioning,
    ConfigPortal,
    UpdateAgent,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Source,
        Stage::Processor,
        Stage::Batcher,
        Stage::Publisher,
        Stage::NetworkConnect,
        Stage::Provisioning,
        Stage::ConfigPortal,
        Stage::UpdateAgent,
    ];

    const fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Processor => "processor",
            Self::Batcher => "batcher",
            Self::Publisher => "publisher",
            Self::NetworkConnect => "network-connect",
            Self::Provisioning => "provisioning",
            Self::ConfigPortal => "config-portal",
            Self::UpdateAgent => "update-agent",
        }
    }
}

/// Set of stages allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunPlan {
    bits: u16,
}

impl RunPlan {
    pub const EMPTY: Self = Self { bits: 0 };

    pub const fn with(self, stage: Stage) -> Self {
        Self {
            bits: self.bits | stage.bit(),
        }
    }

    pub const fn contains(&self, stage: Stage) -> bool {
        self.bits & stage.bit() != 0
    }

    /// Suspend/resume table: a pure function of the system state.
    pub const fn for_state(state: SystemState) -> Self {
        let base = Self::EMPTY;
        match state {
            SystemState::Connecting => base.with(Stage::NetworkConnect),
            SystemState::ConnectedNetwork => {
                base.with(Stage::NetworkConnect).with(Stage::Provisioning)
            }
            SystemState::ConnectedTransportPending => base
                .with(Stage::NetworkConnect)
                .with(Stage::Publisher)
                .with(Stage::Source)
                .with(Stage::Processor),
            SystemState::ConnectedTransport => base
                .with(Stage::NetworkConnect)
                .with(Stage::Publisher)
                .with(Stage::Source)
                .with(Stage::Processor)
                .with(Stage::Batcher),
            SystemState::ConfigMode => base.with(Stage::ConfigPortal),
            SystemState::UpdateMode => base.with(Stage::UpdateAgent),
            SystemState::Error => base,
        }
    }
}

/// Performs a full device restart.
pub trait SystemReset {
    fn restart(&mut self) -> !;
}

/// What the control loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Continue,
    /// The system is in [`SystemState::Error`]; restart after the delay.
    Restart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub transitions: u32,
    pub ignored: u32,
    pub queue_full: u32,
    pub bus_recovered: u32,
    pub connect_failures: u32,
}

pub struct LifecycleController<'a> {
    ctx: &'a SystemContext,
    state: SystemState,
    applied: Option<RunPlan>,
    tick: Duration,
    restart_delay: Duration,
    stats: ControllerStats,
}

impl<'a> LifecycleController<'a> {
    pub fn new(ctx: &'a SystemContext, config: &LifecycleConfig) -> Self {
        Self {
            ctx,
            state: ctx.system_state(),
            applied: None,
            tick: Duration::from_millis(config.tick_ms),
            restart_delay: Duration::from_millis(config.restart_delay_ms),
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> SystemState {
        self.state
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Apply one notification. Returns whether the state changed.
    pub fn handle_event(&mut self, event: LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::QueueFull => {
                self.stats.queue_full = self.stats.queue_full.wrapping_add(1);
                warn!("Pipeline overload reported (queue full)");
            }
            LifecycleEvent::BusRecovered => {
                self.stats.bus_recovered = self.stats.bus_recovered.wrapping_add(1);
                info!("Sensor bus recovered");
            }
            LifecycleEvent::NetworkConnectFailed => {
                self.stats.connect_failures = self.stats.connect_failures.wrapping_add(1);
                warn!("Network connection attempt failed");
            }
            _ => {}
        }

        match transition(self.state, event) {
            Some(next) => {
                info!(
                    "System state {} -> {} ({})",
                    self.state.label(),
                    next.label(),
                    event.label()
                );
                self.state = next;
                self.stats.transitions = self.stats.transitions.wrapping_add(1);
                true
            }
            None => {
                if !event.is_informational() {
                    self.stats.ignored = self.stats.ignored.wrapping_add(1);
                    debug!("Ignoring {} in {}", event.label(), self.state.label());
                }
                false
            }
        }
    }

    /// Drain every pending notification.
    ///
    /// A configure request wins over anything else in the same drain: once
    /// one has been handled, later state-changing notifications are
    /// discarded. Informational ones are still counted.
    pub fn handle_pending(&mut self) -> usize {
        let mut handled = 0;
        let mut configure_latched = false;

        while let Some(event) = self.ctx.take_notification() {
            handled += 1;
            if configure_latched && !event.is_informational() {
                debug!("Discarding {} after configure request", event.label());
                continue;
            }
            if event == LifecycleEvent::ConfigureRequested {
                configure_latched = true;
            }
            self.handle_event(event);
        }
        handled
    }

    /// Publish the run plan for the current state. Returns how many stages
    /// changed run state; re-applying an unchanged plan returns 0.
    pub fn apply_plan(&mut self) -> usize {
        let plan = RunPlan::for_state(self.state);
        let previous = self.applied.unwrap_or(RunPlan::EMPTY);
        let mut changes = 0;

        for stage in Stage::ALL {
            let was = previous.contains(stage);
            let now = plan.contains(stage);
            if was != now || (self.applied.is_none() && now) {
                changes += 1;
                if now {
                    info!("Stage {} resumed", stage.label());
                } else {
                    info!("Stage {} suspended", stage.label());
                }
            }
        }

        self.applied = Some(plan);
        self.ctx.commit(self.state, plan);
        changes
    }

    /// One control-loop iteration.
    pub fn tick(&mut self) -> ControlOutcome {
        self.handle_pending();
        self.apply_plan();
        if self.state == SystemState::Error {
            ControlOutcome::Restart
        } else {
            ControlOutcome::Continue
        }
    }

    pub fn log_stats(&self) {
        let s = &self.stats;
        info!(
            "[Lifecycle] state={} transitions={} ignored={} queue_full={} bus_recovered={} connect_failures={}",
            self.state.label(),
            s.transitions,
            s.ignored,
            s.queue_full,
            s.bus_recovered,
            s.connect_failures
        );
    }

    /// Control loop. Never returns: the error state ends in `reset`.
    pub async fn run<R: SystemReset>(&mut self, reset: &mut R, stats_interval_ms: u64) {
        let mut elapsed_ms = 0u64;
        info!("Lifecycle controller started in {}", self.state.label());

        loop {
            if self.tick() == ControlOutcome::Restart {
                error!(
                    "System in error state, restarting in {}ms",
                    self.restart_delay.as_millis()
                );
                Timer::after(self.restart_delay).await;
                reset.restart();
            }

            Timer::after(self.tick).await;
            elapsed_ms += self.tick.as_millis();
            if elapsed_ms >= stats_interval_ms {
                elapsed_ms = 0;
                self.log_stats();
            }
        }
    }
}
