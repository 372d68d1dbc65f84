//! Turn execution result types.
//!
//! One engine invocation processes one user turn and yields a `TurnResult`;
//! each action inside the turn yields an `ActionOutcome`. Reserved event
//! names live in [`events`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::ExecutionContext;

/// Reserved event names with engine-level meaning.
pub mod events {
    /// Inferred when every action in an action state succeeds.
    pub const SUCCESS: &str = "success";
    /// Inferred when any action fails.
    pub const ERROR: &str = "error";
    /// Transition key matched when no explicit entry exists for an event.
    pub const DEFAULT: &str = "default";
    /// Implicit event carried into a terminal state.
    pub const COMPLETED: &str = "completed";
    /// Transition key consulted first for a cancel interrupt.
    pub const CANCEL: &str = "cancel";

    /// Generic events never override the incoming event on a resumed wait
    /// state; only a more specific action event does.
    pub fn is_generic(event: &str) -> bool {
        event == SUCCESS || event == DEFAULT
    }
}

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

/// Result of a single executor invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action succeeded.
    pub success: bool,
    /// Output value, written to the action's `output` path when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Explicit event to drive the transition (overrides inference).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Error message when the action failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    /// Successful outcome with an output value.
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            event: None,
            error: None,
        }
    }

    /// Successful outcome carrying an explicit transition event.
    pub fn ok_with_event(output: Value, event: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            event: Some(event.into()),
            error: None,
        }
    }

    /// Failed outcome with an error message.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            event: None,
            error: Some(message.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// TurnResult
// ---------------------------------------------------------------------------

/// Result of one engine turn.
///
/// Always returned, never thrown: engine-level failures surface as
/// `error: Some(..)` with `completed: false` and the context's error
/// history extended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnResult {
    /// State the session moved to, or None when it stayed put (wait states
    /// blocking for input, unmatched events, engine errors).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_state: Option<String>,
    /// Event that drove the transition, when one was resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// The mutated context, handed back for persistence.
    pub context: ExecutionContext,
    /// True when the flow reached a final state or a dead end.
    pub completed: bool,
    /// Engine- or action-level error that stopped the turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-turn diagnostics.
    pub metadata: TurnMetadata,
}

/// Diagnostics attached to every turn result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// UUIDv7 turn identifier (time-sortable).
    pub turn_id: Uuid,
    /// State the turn executed in.
    pub state: String,
    /// Number of actions that ran (entry, main, and exit combined).
    pub actions_run: u32,
    /// Wall-clock duration of the turn.
    pub duration_ms: u64,
    /// True when an intent interrupt was handled this turn.
    pub interrupted: bool,
}
