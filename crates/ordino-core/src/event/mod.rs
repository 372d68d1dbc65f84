//! Signal bus for flow lifecycle events.
//!
//! Provides a [`SignalBus`] that distributes `FlowSignal` messages to all
//! subscribers via a `tokio::sync::broadcast` channel.

pub mod bus;

pub use bus::SignalBus;
