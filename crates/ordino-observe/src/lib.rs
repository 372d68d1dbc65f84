//! Observability bootstrap for Ordino.
//!
//! Host processes call [`init_tracing`] once at startup so that the engine's
//! `flow_turn` spans and structured log fields (session ids, executors,
//! transition events) come out through a configured subscriber, and
//! [`shutdown_tracing`] before exit to flush any exported spans.

pub mod tracing_setup;

pub use tracing_setup::{init_tracing, shutdown_tracing};
