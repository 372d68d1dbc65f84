//! Flow domain types for Ordino.
//!
//! Defines the canonical representation of a conversation flow: a named state
//! machine whose states carry actions, transitions, decision conditions, and
//! wait-state validators. Flows are authored as YAML files and convert
//! losslessly to and from `FlowDefinition`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Flow Definition
// ---------------------------------------------------------------------------

/// The canonical flow definition.
///
/// YAML flow files and programmatic construction both produce this struct.
/// It is the single source of truth for a flow's shape; the engine never
/// mutates it at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// Flow identifier, unique within its module (e.g. "place_order").
    pub id: String,
    /// Owning business module (e.g. "food", "parcel").
    pub module: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Semantic version string (e.g. "1.0.0").
    #[serde(default = "default_version")]
    pub version: String,
    /// Name of the state a fresh conversation starts in.
    pub initial_state: String,
    /// Names of the states that end the conversation.
    pub final_states: Vec<String>,
    /// All states, keyed by name.
    pub states: HashMap<String, StateDefinition>,
    /// Name of a registered context schema to check after each turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_schema: Option<String>,
    /// Flow-level behavior settings.
    #[serde(default)]
    pub settings: FlowSettings,
    /// Extensible metadata (for authoring tools / custom integrations).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl FlowDefinition {
    /// Look up a state by name.
    pub fn state(&self, name: &str) -> Option<&StateDefinition> {
        self.states.get(name)
    }

    /// True when `name` is one of the declared final states.
    pub fn is_final_state(&self, name: &str) -> bool {
        self.final_states.iter().any(|s| s == name)
    }

    /// The first declared final state, used as the fallback cancel target.
    pub fn first_final_state(&self) -> Option<&str> {
        self.final_states.first().map(String::as_str)
    }
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Flow-level behavior settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Preferred target state for a cancel interrupt. When absent, the
    /// engine falls back to the first declared final state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_state: Option<String>,
}

// ---------------------------------------------------------------------------
// State Definition
// ---------------------------------------------------------------------------

/// A single state in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDefinition {
    /// The kind of state.
    #[serde(rename = "type")]
    pub kind: StateKind,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Actions executed when the state runs (entry turn for action states,
    /// resume turn for wait states).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDefinition>,
    /// Actions executed on first entry only (wait states run these before
    /// blocking for input).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_entry: Vec<ActionDefinition>,
    /// Actions executed when leaving this state for another.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<ActionDefinition>,
    /// Event name to next-state mapping. The reserved key "default" matches
    /// any event that has no explicit entry.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub transitions: HashMap<String, String>,
    /// Decision rules, evaluated in order (decision states only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionRule>,
    /// Input validator applied when a wait state resumes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<ValidatorConfig>,
}

impl StateDefinition {
    /// Transition target for an event name, without default fallback.
    pub fn transition(&self, event: &str) -> Option<&str> {
        self.transitions.get(event).map(String::as_str)
    }

    /// True when this state declares no outgoing transitions at all.
    pub fn is_dead_end(&self) -> bool {
        self.transitions.is_empty()
    }
}

/// The kind of state in a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Runs its actions and transitions in the same turn.
    Action,
    /// Evaluates condition rules to pick an event; no side effects.
    Decision,
    /// Blocks for user input on first entry; runs actions on resume.
    Wait,
    /// Terminal state (conversation over).
    End,
    /// Terminal state (alias kept for flow authors; same semantics as End).
    Final,
}

impl StateKind {
    /// True for both terminal kinds.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::End | StateKind::Final)
    }
}

// ---------------------------------------------------------------------------
// Action Definition
// ---------------------------------------------------------------------------

/// One action attached to a state, dispatched by executor name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Registered executor name (e.g. "resolve_address", "set_context").
    pub executor: String,
    /// Executor configuration. String leaves may contain `{{ ... }}`
    /// templates, interpolated against the context before execution.
    #[serde(default = "default_config")]
    pub config: serde_json::Value,
    /// Dotted context path that receives the action's output value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// What to do when the executor fails.
    #[serde(default)]
    pub on_error: OnErrorPolicy,
    /// Additional retry attempts after the first failure (retry policy only).
    #[serde(default)]
    pub max_retries: u32,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Failure policy for a single action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnErrorPolicy {
    /// Record the error and run the remaining actions.
    Continue,
    /// Record the error and skip to the next action (same as continue for
    /// sequencing; the action's output path is left untouched).
    Skip,
    /// Retry with exponential backoff up to `max_retries` extra attempts.
    Retry,
    /// Abort the remaining actions and surface the error (default).
    #[default]
    Fail,
}

// ---------------------------------------------------------------------------
// Decision Conditions
// ---------------------------------------------------------------------------

/// One decision rule: when the expression is truthy, trigger the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    /// Boolean JEXL expression over the execution context.
    pub when: String,
    /// Event triggered when the expression evaluates truthy.
    pub event: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Wait-State Validator Configuration
// ---------------------------------------------------------------------------

/// Input validation applied when a wait state resumes with user input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Named rule understood by the input validator (e.g. "one_of").
    pub rule: String,
    /// Rule parameters.
    #[serde(default = "default_params")]
    pub params: serde_json::Value,
    /// Dotted context path that receives the extracted value on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Consecutive failures tolerated before the escape transition fires.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    /// State to transition to once failures are exhausted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_invalid: Option<String>,
    /// Suggested re-prompt template shown to the user on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

fn default_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

fn default_max_failures() -> u32 {
    3
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
