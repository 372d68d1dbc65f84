//! Core engine logic for Ordino.
//!
//! This crate contains the flow state machine engine, the executor and
//! validator contracts it orchestrates, and the signal bus that surfaces
//! turn lifecycle events. It follows clean architecture: no HTTP, no
//! database drivers, no concrete integrations. Those live in outer crates
//! and plug in through the traits defined here.

pub mod action;
pub mod event;
pub mod flow;
