use crate::types::SignalState;

/// State change reported by [`HysteresisDetector::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnteredChanging,
    EnteredStable,
}

/// STABLE/CHANGING state machine with a hysteresis band.
///
/// CHANGING is entered as soon as `|derivative|` exceeds the threshold.
/// STABLE is re-entered only once `|derivative|` drops below
/// `threshold * hysteresis_factor` and the change has lasted at least the
/// minimum dwell time.
#[derive(Debug, Clone)]
pub struct HysteresisDetector {
    enter_threshold: f32,
    exit_threshold: f32,
    min_dwell_ms: u64,
    state: SignalState,
    since_ms: u64,
}

impl HysteresisDetector {
    pub fn new(threshold: f32, hysteresis_factor: f32, min_dwell_ms: u64) -> Self {
        Self {
            enter_threshold: threshold,
            exit_threshold: threshold * hysteresis_factor,
            min_dwell_ms,
            state: SignalState::Stable,
            since_ms: 0,
        }
    }

    /// Start timing the initial STABLE state.
    pub fn start(&mut self, now_ms: u64) {
        self.state = SignalState::Stable;
        self.since_ms = now_ms;
    }

    pub fn update(&mut self, derivative: f32, now_ms: u64) -> Option<Transition> {
        let magnitude = libm::fabsf(derivative);
        match self.state {
            SignalState::Stable if magnitude > self.enter_threshold => {
                self.state = SignalState::Changing;
                self.since_ms = now_ms;
                Some(Transition::EnteredChanging)
            }
            SignalState::Changing
                if magnitude < self.exit_threshold
                    && now_ms.saturating_sub(self.since_ms) >= self.min_dwell_ms =>
            {
                self.state = SignalState::Stable;
                self.since_ms = now_ms;
                Some(Transition::EnteredStable)
            }
            _ => None,
        }
    }

    pub fn state(&self) -> SignalState {
        self.state
    }
}
