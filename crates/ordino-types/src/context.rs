//! Execution context for a conversation session.
//!
//! `ExecutionContext` is the mutable state a flow carries across turns:
//! free-form conversation data plus a `_system` envelope the engine owns
//! (current state, turn count, error history). The caller persists the
//! context between turns and hands it back on the next one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Well-known keys in the data section. Underscore-prefixed keys are shared
/// conventions between the engine, executors, and the calling service.
pub mod keys {
    /// Set truthy by the NLU layer when the user's message is an interrupt.
    pub const INTENT_INTERRUPT: &str = "_intent_interrupt";
    /// The classified intent string accompanying an interrupt.
    pub const CURRENT_INTENT: &str = "_current_intent";
    /// Set by the engine when the user asked for help/menu.
    pub const HELP_REQUESTED: &str = "_help_requested";
    /// Set by the engine when the user asked to switch to another flow.
    pub const PENDING_FLOW_SWITCH: &str = "_pending_flow_switch";
    /// Per-state validation failure counters (object keyed by state name).
    pub const VALIDATION_FAILURES: &str = "_validation_failures";
    /// Reason the last input failed validation.
    pub const VALIDATION_ERROR: &str = "_validation_error";
    /// Suggested re-prompt for the user after a validation failure.
    pub const SUGGESTED_RESPONSE: &str = "_suggested_response";
    /// Raw user input for the current turn, staged by the caller.
    pub const USER_INPUT: &str = "_user_input";
    /// Default output path for validated input.
    pub const VALIDATED_INPUT: &str = "_validated_input";
    /// Default output path for staged response text.
    pub const RESPONSE: &str = "_response";
}

/// JS-like truthiness over JSON values, the coercion rule shared by
/// templates, decision conditions, and interrupt flags: null, false, 0,
/// and "" are falsy; everything else (including empty arrays and objects)
/// is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// The full conversation state for one session.
///
/// Serializes with data keys at the top level and the engine-owned envelope
/// under `_system`, so persisted contexts read naturally:
///
/// ```json
/// { "cart": {...}, "_user_input": "two pizzas", "_system": {...} }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Engine-owned session envelope.
    #[serde(rename = "_system")]
    pub system: SystemContext,
    /// Free-form conversation data, read and written by executors.
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ExecutionContext {
    /// Fresh context positioned at a flow's initial state.
    pub fn new(session_id: impl Into<String>, flow_id: impl Into<String>, initial_state: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            system: SystemContext {
                session_id: session_id.into(),
                flow_id: flow_id.into(),
                current_state: initial_state.into(),
                turn_count: 0,
                error_history: Vec::new(),
                started_at: now,
                updated_at: now,
            },
            data: Map::new(),
        }
    }

    /// Serialize for persistence.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Restore a persisted context.
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The scope object handed to JEXL condition expressions:
    /// `data.*` plus a read-only slice of the system envelope.
    pub fn expression_scope(&self) -> Value {
        json!({
            "data": Value::Object(self.data.clone()),
            "system": {
                "session_id": self.system.session_id,
                "flow_id": self.system.flow_id,
                "current_state": self.system.current_state,
                "turn_count": self.system.turn_count,
            },
        })
    }

    // -- interrupt flags ----------------------------------------------------

    /// True when the NLU layer flagged this turn as an intent interrupt.
    pub fn intent_interrupt(&self) -> bool {
        self.data.get(keys::INTENT_INTERRUPT).is_some_and(is_truthy)
    }

    /// The classified intent accompanying an interrupt, if any.
    pub fn current_intent(&self) -> Option<&str> {
        self.data.get(keys::CURRENT_INTENT).and_then(Value::as_str)
    }

    /// Flag an interrupt with its classified intent (caller-side helper).
    pub fn set_intent_interrupt(&mut self, intent: impl Into<String>) {
        self.data.insert(keys::INTENT_INTERRUPT.to_string(), Value::Bool(true));
        self.data.insert(keys::CURRENT_INTENT.to_string(), Value::String(intent.into()));
    }

    /// Clear the interrupt flag and intent after handling.
    pub fn clear_intent_interrupt(&mut self) {
        self.data.remove(keys::INTENT_INTERRUPT);
        self.data.remove(keys::CURRENT_INTENT);
    }

    /// True when a help/menu interrupt was recorded this turn.
    pub fn help_requested(&self) -> bool {
        self.data.get(keys::HELP_REQUESTED).is_some_and(is_truthy)
    }

    pub fn set_help_requested(&mut self) {
        self.data.insert(keys::HELP_REQUESTED.to_string(), Value::Bool(true));
    }

    /// Flow the user asked to switch to, recorded for the calling service.
    pub fn pending_flow_switch(&self) -> Option<&str> {
        self.data.get(keys::PENDING_FLOW_SWITCH).and_then(Value::as_str)
    }

    pub fn set_pending_flow_switch(&mut self, target: impl Into<String>) {
        self.data
            .insert(keys::PENDING_FLOW_SWITCH.to_string(), Value::String(target.into()));
    }

    // -- user input ---------------------------------------------------------

    /// Raw user input staged by the caller for this turn.
    pub fn user_input(&self) -> Option<&Value> {
        self.data.get(keys::USER_INPUT)
    }

    pub fn set_user_input(&mut self, value: Value) {
        self.data.insert(keys::USER_INPUT.to_string(), value);
    }

    // -- validation failure counters ----------------------------------------

    /// Consecutive validation failures recorded for a state.
    pub fn validation_failures(&self, state: &str) -> u32 {
        self.data
            .get(keys::VALIDATION_FAILURES)
            .and_then(|v| v.get(state))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Increment the failure counter for a state; returns the new count.
    pub fn bump_validation_failures(&mut self, state: &str) -> u32 {
        let next = self.validation_failures(state) + 1;
        let counters = self
            .data
            .entry(keys::VALIDATION_FAILURES.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = counters {
            map.insert(state.to_string(), json!(next));
        }
        next
    }

    /// Reset the failure counter for a state (on success or escape).
    pub fn reset_validation_failures(&mut self, state: &str) {
        if let Some(Value::Object(map)) = self.data.get_mut(keys::VALIDATION_FAILURES) {
            map.remove(state);
        }
    }

    /// Record why the last input failed and what to ask next.
    pub fn set_validation_error(&mut self, reason: impl Into<String>, suggested: Option<String>) {
        self.data
            .insert(keys::VALIDATION_ERROR.to_string(), Value::String(reason.into()));
        if let Some(prompt) = suggested {
            self.data
                .insert(keys::SUGGESTED_RESPONSE.to_string(), Value::String(prompt));
        }
    }

    pub fn clear_validation_error(&mut self) {
        self.data.remove(keys::VALIDATION_ERROR);
        self.data.remove(keys::SUGGESTED_RESPONSE);
    }
}

// ---------------------------------------------------------------------------
// SystemContext
// ---------------------------------------------------------------------------

/// Engine-owned session envelope, serialized under `_system`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemContext {
    /// Caller-assigned session identifier.
    pub session_id: String,
    /// Flow this session is executing.
    pub flow_id: String,
    /// State the session is currently in.
    pub current_state: String,
    /// Number of completed engine turns.
    pub turn_count: u64,
    /// Recent engine-level errors, oldest first, capped by the engine.
    #[serde(default)]
    pub error_history: Vec<ErrorRecord>,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the context was last touched by the engine.
    pub updated_at: DateTime<Utc>,
}

impl SystemContext {
    /// Append an error record, dropping the oldest entries beyond `max`.
    pub fn push_error(&mut self, record: ErrorRecord, max: usize) {
        self.error_history.push(record);
        if self.error_history.len() > max {
            let excess = self.error_history.len() - max;
            self.error_history.drain(..excess);
        }
    }
}

/// One engine-level error, kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// State the session was in when the error occurred.
    pub state: String,
    /// Executor involved, when the error came from an action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<String>,
    /// Error message.
    pub message: String,
    /// When the error was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(state: impl Into<String>, executor: Option<String>, message: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            executor,
            message: message.into(),
            recorded_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
