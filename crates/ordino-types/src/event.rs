//! Lifecycle signal types for the Ordino signal bus.
//!
//! `FlowSignal` is the unified event type broadcast while the engine
//! executes a turn. All variants are Clone + Send + Sync for use with
//! tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Signals emitted during turn execution.
///
/// Used by the signal bus to surface turn lifecycle, action progress,
/// validation outcomes, and interrupt handling to subscribers (logging,
/// metrics, conversation dashboards).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowSignal {
    /// A turn has started executing.
    TurnStarted {
        session_id: String,
        flow_id: String,
        state: String,
        turn_id: Uuid,
    },

    /// An action is about to run.
    ActionStarted {
        session_id: String,
        state: String,
        executor: String,
    },

    /// An action completed successfully.
    ActionCompleted {
        session_id: String,
        state: String,
        executor: String,
        duration_ms: u64,
    },

    /// An action failed.
    ActionFailed {
        session_id: String,
        state: String,
        executor: String,
        error: String,
        will_retry: bool,
    },

    /// A wait-state input failed validation.
    ValidationFailed {
        session_id: String,
        state: String,
        /// Consecutive failures recorded for this state, including this one.
        failures: u32,
        reason: String,
    },

    /// An intent interrupt was handled.
    InterruptHandled {
        session_id: String,
        state: String,
        intent: String,
    },

    /// A turn finished (successfully or not).
    TurnCompleted {
        session_id: String,
        state: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_state: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event: Option<String>,
        completed: bool,
        duration_ms: u64,
    },
}

impl FlowSignal {
    /// The session this signal belongs to. Every variant is session-scoped.
    pub fn session_id(&self) -> &str {
        match self {
            FlowSignal::TurnStarted { session_id, .. }
            | FlowSignal::ActionStarted { session_id, .. }
            | FlowSignal::ActionCompleted { session_id, .. }
            | FlowSignal::ActionFailed { session_id, .. }
            | FlowSignal::ValidationFailed { session_id, .. }
            | FlowSignal::InterruptHandled { session_id, .. }
            | FlowSignal::TurnCompleted { session_id, .. } => session_id,
        }
    }
}
