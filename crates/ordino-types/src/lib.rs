//! Shared domain types for Ordino.
//!
//! This crate contains the core domain types used across the Ordino flow
//! engine: flow definitions, execution contexts, turn results, interrupt
//! intents, lifecycle signals, and engine settings.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod flow;
pub mod intent;
pub mod turn;
