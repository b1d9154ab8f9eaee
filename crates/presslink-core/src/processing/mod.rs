//! Signal Processor
//!
//! Turns validated raw samples into [`PressureEvent`](crate::types::PressureEvent)s:
//! cascaded smoothing, a windowed derivative, a hysteresis state machine, and
//! per-state accumulation into stable periods or detailed change captures.

mod accumulator;
mod derivative;
mod detector;
mod filter;
mod processor;

pub use accumulator::{ChangeCapture, StableAccumulator, classify};
pub use derivative::DerivativeWindow;
pub use detector::{HysteresisDetector, Transition};
pub use filter::{CascadedEma, Ema};
pub use processor::{ProcessorStats, SignalProcessor};
