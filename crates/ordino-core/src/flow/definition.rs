//! Flow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the canonical `FlowDefinition` IR,
//! validates structural constraints (declared states, transition targets,
//! registered executors), and provides discovery for flow files on disk.
//!
//! Two validation surfaces with different contracts:
//! - [`validate_definition`] fails closed on the first structural error and
//!   gates parsing, so a loaded flow is always structurally sound.
//! - [`validate_flow`] never fails: it collects every violation (including
//!   executor registration, which needs a registry) into a deterministic
//!   report for authoring tools and load-time audits.

use std::path::{Path, PathBuf};

use thiserror::Error;

use ordino_types::flow::{ActionDefinition, FlowDefinition, OnErrorPolicy, StateKind};

use crate::action::registry::ExecutorRegistry;

use super::graph;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during flow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// A turn referenced a state the flow does not declare.
    #[error("unknown state: '{0}'")]
    UnknownState(String),

    /// JEXL condition evaluation failure.
    #[error("expression error: {0}")]
    ExpressionError(String),

    /// A turn for this session is already executing.
    #[error("turn already in progress for session '{0}'")]
    TurnInProgress(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `FlowDefinition`.
///
/// Runs `validate_definition` after deserialization, so the returned value
/// is guaranteed to be structurally valid.
pub fn parse_flow_yaml(yaml: &str) -> Result<FlowDefinition, FlowError> {
    let def: FlowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| FlowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `FlowDefinition` to a YAML string.
pub fn serialize_flow_yaml(def: &FlowDefinition) -> Result<String, FlowError> {
    serde_yaml_ng::to_string(def).map_err(|e| FlowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Fail-closed validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `FlowDefinition`.
///
/// Checks:
/// - Flow id is non-empty and contains only alphanumerics, hyphens, underscores
/// - Module is non-empty
/// - At least one state exists
/// - `initial_state`, every `final_states` entry, every transition target,
///   every validator `on_invalid` target, and `settings.cancel_state` (if set)
///   name declared states
/// - Decision states declare at least one condition; no other kind does
/// - Terminal states (`end`/`final`) carry no actions and no transitions
pub fn validate_definition(def: &FlowDefinition) -> Result<(), FlowError> {
    // Id format: non-empty, alphanumeric + hyphens/underscores
    if def.id.is_empty() {
        return Err(FlowError::ValidationError(
            "flow id must not be empty".to_string(),
        ));
    }
    if !def
        .id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(FlowError::ValidationError(format!(
            "flow id '{}' contains invalid characters (only alphanumerics, hyphens, and underscores allowed)",
            def.id
        )));
    }

    if def.module.is_empty() {
        return Err(FlowError::ValidationError(
            "flow module must not be empty".to_string(),
        ));
    }

    // At least one state
    if def.states.is_empty() {
        return Err(FlowError::ValidationError(
            "flow must have at least one state".to_string(),
        ));
    }

    // Initial state must be declared
    if !def.states.contains_key(&def.initial_state) {
        return Err(FlowError::ValidationError(format!(
            "initial state '{}' is not declared",
            def.initial_state
        )));
    }

    // Final states must be declared
    for name in &def.final_states {
        if !def.states.contains_key(name) {
            return Err(FlowError::ValidationError(format!(
                "final state '{}' is not declared",
                name
            )));
        }
    }

    // Cancel state must be declared if configured
    if let Some(cancel) = &def.settings.cancel_state {
        if !def.states.contains_key(cancel) {
            return Err(FlowError::ValidationError(format!(
                "cancel state '{}' is not declared",
                cancel
            )));
        }
    }

    // Per-state structural checks
    for (name, state) in &def.states {
        for (event, target) in &state.transitions {
            if !def.states.contains_key(target) {
                return Err(FlowError::ValidationError(format!(
                    "state '{}' transition '{}' targets undeclared state '{}'",
                    name, event, target
                )));
            }
        }

        match state.kind {
            StateKind::Decision => {
                if state.conditions.is_empty() {
                    return Err(FlowError::ValidationError(format!(
                        "decision state '{}' must declare at least one condition",
                        name
                    )));
                }
            }
            kind => {
                if !state.conditions.is_empty() {
                    return Err(FlowError::ValidationError(format!(
                        "state '{}' declares conditions but is not a decision state",
                        name
                    )));
                }
                if kind.is_terminal() {
                    if !state.actions.is_empty() {
                        return Err(FlowError::ValidationError(format!(
                            "terminal state '{}' must not declare actions",
                            name
                        )));
                    }
                    if !state.transitions.is_empty() {
                        return Err(FlowError::ValidationError(format!(
                            "terminal state '{}' must not declare transitions",
                            name
                        )));
                    }
                }
            }
        }

        if let Some(validator) = &state.validator {
            if let Some(target) = &validator.on_invalid {
                if !def.states.contains_key(target) {
                    return Err(FlowError::ValidationError(format!(
                        "state '{}' validator targets undeclared state '{}'",
                        name, target
                    )));
                }
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Collect-all validation
// ---------------------------------------------------------------------------

/// Report produced by [`validate_flow`].
///
/// `errors` are violations that make the flow unsafe to run; `warnings`
/// flag suspicious authoring (unreachable states, dead retry config) that
/// the engine tolerates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FlowValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Structurally audit a flow against an executor registry.
///
/// Never fails: every violation is collected. Output order is
/// deterministic for an unchanged flow (flow-level checks first, then
/// states in name order, transitions in event order), so repeated audits
/// of the same definition produce identical reports.
pub fn validate_flow(def: &FlowDefinition, registry: &ExecutorRegistry) -> FlowValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if def.states.is_empty() {
        errors.push("flow must have at least one state".to_string());
    }

    if !def.states.contains_key(&def.initial_state) {
        errors.push(format!(
            "initial state '{}' is not declared",
            def.initial_state
        ));
    }

    for name in &def.final_states {
        if !def.states.contains_key(name) {
            errors.push(format!("final state '{}' is not declared", name));
        }
    }

    if let Some(cancel) = &def.settings.cancel_state {
        if !def.states.contains_key(cancel) {
            errors.push(format!("cancel state '{}' is not declared", cancel));
        }
    }

    let mut state_names: Vec<&String> = def.states.keys().collect();
    state_names.sort();

    for name in &state_names {
        let state = &def.states[*name];

        let mut transitions: Vec<(&String, &String)> = state.transitions.iter().collect();
        transitions.sort();
        for (event, target) in transitions {
            if !def.states.contains_key(target) {
                errors.push(format!(
                    "state '{}' transition '{}' targets undeclared state '{}'",
                    name, event, target
                ));
            }
        }

        match state.kind {
            StateKind::Decision => {
                if state.conditions.is_empty() {
                    errors.push(format!(
                        "decision state '{}' must declare at least one condition",
                        name
                    ));
                }
            }
            kind => {
                if !state.conditions.is_empty() {
                    errors.push(format!(
                        "state '{}' declares conditions but is not a decision state",
                        name
                    ));
                }
                if kind.is_terminal() {
                    if !state.actions.is_empty() {
                        errors.push(format!(
                            "terminal state '{}' must not declare actions",
                            name
                        ));
                    }
                    if !state.transitions.is_empty() {
                        errors.push(format!(
                            "terminal state '{}' must not declare transitions",
                            name
                        ));
                    }
                }
            }
        }

        if let Some(validator) = &state.validator {
            if let Some(target) = &validator.on_invalid {
                if !def.states.contains_key(target) {
                    errors.push(format!(
                        "state '{}' validator targets undeclared state '{}'",
                        name, target
                    ));
                }
            }
            if state.kind != StateKind::Wait {
                warnings.push(format!(
                    "state '{}' declares a validator but is not a wait state",
                    name
                ));
            }
        }

        audit_actions(name, "action", &state.actions, registry, &mut errors, &mut warnings);
        audit_actions(name, "entry action", &state.on_entry, registry, &mut errors, &mut warnings);
        audit_actions(name, "exit action", &state.on_exit, registry, &mut errors, &mut warnings);
    }

    for unreachable in graph::unreachable_states(def) {
        warnings.push(format!(
            "state '{}' is unreachable from the initial state",
            unreachable
        ));
    }

    FlowValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Check one action list against the registry.
fn audit_actions(
    state: &str,
    kind: &str,
    actions: &[ActionDefinition],
    registry: &ExecutorRegistry,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    for (index, action) in actions.iter().enumerate() {
        match registry.get(&action.executor) {
            None => {
                errors.push(format!(
                    "state '{}' {} {} references unregistered executor '{}'",
                    state, kind, index, action.executor
                ));
            }
            Some(executor) => {
                if let Err(e) = executor.validate_config(&action.config) {
                    errors.push(format!(
                        "state '{}' {} {} ('{}') has invalid config: {}",
                        state, kind, index, action.executor, e
                    ));
                }
            }
        }

        if action.max_retries > 0 && action.on_error != OnErrorPolicy::Retry {
            warnings.push(format!(
                "state '{}' {} {} sets max_retries but on_error is not 'retry'",
                state, kind, index
            ));
        }
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a flow definition from a YAML file.
pub fn load_flow_file(path: &Path) -> Result<FlowDefinition, FlowError> {
    let content = std::fs::read_to_string(path)?;
    parse_flow_yaml(&content)
}

/// Save a flow definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_flow_file(path: &Path, def: &FlowDefinition) -> Result<(), FlowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_flow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all flow YAML files under `base_dir`.
///
/// Scans for `.yaml` and `.yml` files recursively. Each file is parsed and
/// returned alongside its path. Files that fail to parse are skipped with
/// a warning, not returned as errors.
pub fn discover_flows(base_dir: &Path) -> Result<Vec<(PathBuf, FlowDefinition)>, FlowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, FlowDefinition)>,
) -> Result<(), FlowError> {
    let entries = std::fs::read_dir(dir)?;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_flow_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(_) => {
                        // Skip files that fail to parse (they may not be flows)
                        tracing::warn!(?path, "skipping unparseable flow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
