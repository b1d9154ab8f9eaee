//! Application-wide state and error types for presslink

mod lifecycle;

pub use lifecycle::*;

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use thiserror_no_std::Error;

use crate::batching::FormatError;
use crate::config::{ConfigError, NOTIFICATION_QUEUE_CAPACITY};
use crate::queue::BoundedQueue;
use crate::sensors::SensorError;

/// Connectivity lifecycle of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Connecting,
    ConnectedNetwork,
    ConnectedTransportPending,
    ConnectedTransport,
    ConfigMode,
    UpdateMode,
    Error,
}

impl SystemState {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Connecting => "CONNECTING",
            Self::ConnectedNetwork => "CONNECTED_NETWORK",
            Self::ConnectedTransportPending => "CONNECTED_TRANSPORT_PENDING",
            Self::ConnectedTransport => "CONNECTED_TRANSPORT",
            Self::ConfigMode => "CONFIG_MODE",
            Self::UpdateMode => "UPDATE_MODE",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ControlSnapshot {
    state: SystemState,
    plan: RunPlan,
}

/// State shared by every task.
///
/// The system state and run plan are written only by the
/// [`LifecycleController`]; stages read them at the top of each loop
/// iteration. Notifications flow the other way through a bounded queue and
/// never block the sender.
pub struct SystemContext {
    control: BlockingMutex<CriticalSectionRawMutex, Cell<ControlSnapshot>>,
    notifications: BoundedQueue<LifecycleEvent, NOTIFICATION_QUEUE_CAPACITY>,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemContext {
    pub const fn new() -> Self {
        Self {
            control: BlockingMutex::new(Cell::new(ControlSnapshot {
                state: SystemState::Connecting,
                plan: RunPlan::for_state(SystemState::Connecting),
            })),
            notifications: BoundedQueue::new(),
        }
    }

    pub fn system_state(&self) -> SystemState {
        self.control.lock(|c| c.get().state)
    }

    pub fn run_plan(&self) -> RunPlan {
        self.control.lock(|c| c.get().plan)
    }

    pub fn is_running(&self, stage: Stage) -> bool {
        self.run_plan().contains(stage)
    }

    /// Fire-and-forget notification to the controller. Returns `false` if
    /// the notification queue was full and the event was discarded.
    pub fn notify(&self, event: LifecycleEvent) -> bool {
        self.notifications.try_push(event).is_ok()
    }

    pub fn pending_notifications(&self) -> usize {
        self.notifications.len()
    }

    pub(crate) fn commit(&self, state: SystemState, plan: RunPlan) {
        self.control.lock(|c| c.set(ControlSnapshot { state, plan }));
    }

    pub(crate) fn take_notification(&self) -> Option<LifecycleEvent> {
        self.notifications.try_pop()
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
    #[error("Message formatting error: {0}")]
    Format(#[from] FormatError),
    #[error("Startup failed: {0}")]
    Startup(heapless::String<64>),
}
