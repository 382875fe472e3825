//! Observability utilities.
//!
//! The library only emits `tracing` events. Binaries and tests install a
//! subscriber with [`init_tracing`] or [`init_json_tracing`].

mod subscriber;
mod timer;

pub use subscriber::{init_json_tracing, init_tracing, DEFAULT_FILTER};
pub use timer::PhaseTimer;
