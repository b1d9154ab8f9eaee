//! Hardware-independent core library for the presslink gateway
//!
//! This crate contains the real-time pressure telemetry pipeline: the sample
//! source that polls the transducer, the signal processor that turns filtered
//! samples into stable/changing events, the batcher that packs events into
//! outbound messages, and the lifecycle controller that decides which of
//! those stages may run.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod app_state;
pub mod batching;
pub mod bus;
pub mod config;
pub mod processing;
pub mod queue;
pub mod sensors;
pub mod source;
pub mod stats;
pub mod types;
