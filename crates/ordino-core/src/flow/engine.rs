//! Flow state machine engine.
//!
//! `FlowEngine` advances a conversation session one turn at a time. Each
//! `execute_state` call resolves pending intent interrupts, runs the current
//! state's actions under per-action error policy, infers the triggered event,
//! resolves the transition, and hands the mutated context back to the caller
//! for persistence.
//!
//! # Turn pipeline
//!
//! 1. Re-entrancy guard: one in-flight turn per session.
//! 2. Intent interrupt resolution (cancel-class intents force a transition).
//! 3. Terminal states report completion immediately.
//! 4. Entry actions, on first entry only (no incoming event).
//! 5. Wait states block on first entry; on resume the input gate validates
//!    the staged user input before anything else runs.
//! 6. State actions, strictly sequential, each with template interpolation
//!    and retry backoff per its error policy.
//! 7. Event resolution, transition lookup, exit actions, completion check.
//!
//! Engine-level failures never escape as panics or `Err`: they land in the
//! context's `_system.error_history` and come back as a non-completed
//! `TurnResult` with `error` set.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde_json::Value;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use ordino_types::config::EngineSettings;
use ordino_types::context::{ErrorRecord, ExecutionContext, keys};
use ordino_types::event::FlowSignal;
use ordino_types::flow::{
    ActionDefinition, FlowDefinition, OnErrorPolicy, StateDefinition, StateKind, ValidatorConfig,
};
use ordino_types::turn::{ActionOutcome, TurnMetadata, TurnResult, events};

use crate::action::registry::ExecutorRegistry;
use crate::event::bus::SignalBus;

use super::definition::{FlowError, FlowValidation, validate_flow};
use super::expression::ConditionEvaluator;
use super::interrupt::{InterruptOutcome, check_interrupt};
use super::path::set_path;
use super::retry::{backoff_delay, should_retry};
use super::schema::{ContextSchemaValidator, NoopSchemaValidator};
use super::template::interpolate_object;
use super::validator::{BoxInputValidator, InputValidator, RuleValidator};

// ---------------------------------------------------------------------------
// FlowEngine
// ---------------------------------------------------------------------------

/// The flow state machine engine.
///
/// Holds no per-session state beyond the re-entrancy guard: the context is
/// owned by the caller and threaded through each turn, so one engine serves
/// every concurrent session in the process.
pub struct FlowEngine {
    registry: Arc<ExecutorRegistry>,
    validator: BoxInputValidator,
    schema_validator: Box<dyn ContextSchemaValidator>,
    evaluator: ConditionEvaluator,
    signals: SignalBus,
    settings: EngineSettings,
    /// Sessions with a turn currently executing.
    active_sessions: DashMap<String, ()>,
}

impl FlowEngine {
    /// Engine with default collaborators: built-in rule validator, no-op
    /// schema validator, default settings.
    pub fn new(registry: Arc<ExecutorRegistry>) -> Self {
        Self::builder(registry).build()
    }

    pub fn builder(registry: Arc<ExecutorRegistry>) -> FlowEngineBuilder {
        FlowEngineBuilder {
            registry,
            validator: None,
            schema_validator: None,
            signals: None,
            settings: EngineSettings::default(),
        }
    }

    /// The signal bus this engine publishes lifecycle events on.
    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Structurally audit a flow against this engine's executor registry.
    pub fn validate(&self, flow: &FlowDefinition) -> FlowValidation {
        validate_flow(flow, &self.registry)
    }

    /// Execute one turn of the flow for the session the context belongs to.
    ///
    /// `event` is the incoming signal for this turn: `None` on first entry
    /// into a state, or the user-input event that resumes a wait state.
    /// Never fails: engine-level errors are folded into the returned
    /// `TurnResult`.
    pub async fn execute_state(
        &self,
        flow: &FlowDefinition,
        mut context: ExecutionContext,
        event: Option<&str>,
    ) -> TurnResult {
        let turn_id = Uuid::now_v7();
        let started = Instant::now();
        let session_id = context.system.session_id.clone();
        let entry_state = context.system.current_state.clone();

        // One turn per session at a time; a rejected turn leaves the
        // context untouched.
        match self.active_sessions.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                let error = FlowError::TurnInProgress(session_id.clone());
                warn!(session_id = session_id.as_str(), "rejected re-entrant turn");
                return TurnResult {
                    next_state: None,
                    event: None,
                    context,
                    completed: false,
                    error: Some(error.to_string()),
                    metadata: TurnMetadata {
                        turn_id,
                        state: entry_state,
                        actions_run: 0,
                        duration_ms: started.elapsed().as_millis() as u64,
                        interrupted: false,
                    },
                };
            }
            Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        let mut stats = TurnStats::default();
        let span = info_span!(
            "flow_turn",
            session_id = %session_id,
            flow = %flow.id,
            state = %entry_state,
        );
        let result = self
            .run_turn(flow, &mut context, event, turn_id, &mut stats)
            .instrument(span)
            .await;

        self.active_sessions.remove(&session_id);

        let outcome = match result {
            Ok(outcome) => {
                if let Some(schema) = &flow.context_schema {
                    // Schema findings are diagnostics, never fatal to the turn.
                    let report = self.schema_validator.validate(schema, &context.data);
                    if !report.valid {
                        warn!(
                            schema = schema.as_str(),
                            errors = ?report.errors,
                            "context failed schema validation"
                        );
                    }
                }
                outcome
            }
            Err(e) => {
                let message = e.to_string();
                warn!(error = message.as_str(), "turn aborted by engine error");
                context.system.push_error(
                    ErrorRecord::new(entry_state.clone(), None, message.clone()),
                    self.settings.max_error_history,
                );
                TurnOutcome {
                    next_state: None,
                    event: None,
                    completed: false,
                    error: Some(message),
                }
            }
        };

        context.system.updated_at = Utc::now();
        let duration_ms = started.elapsed().as_millis() as u64;

        self.signals.publish(FlowSignal::TurnCompleted {
            session_id,
            state: entry_state.clone(),
            next_state: outcome.next_state.clone(),
            event: outcome.event.clone(),
            completed: outcome.completed,
            duration_ms,
        });

        TurnResult {
            next_state: outcome.next_state,
            event: outcome.event,
            context,
            completed: outcome.completed,
            error: outcome.error,
            metadata: TurnMetadata {
                turn_id,
                state: entry_state,
                actions_run: stats.actions_run,
                duration_ms,
                interrupted: stats.interrupted,
            },
        }
    }

    // -----------------------------------------------------------------------
    // Turn pipeline
    // -----------------------------------------------------------------------

    async fn run_turn(
        &self,
        flow: &FlowDefinition,
        context: &mut ExecutionContext,
        incoming: Option<&str>,
        turn_id: Uuid,
        stats: &mut TurnStats,
    ) -> Result<TurnOutcome, FlowError> {
        context.system.turn_count += 1;
        let session_id = context.system.session_id.clone();
        let state_name = context.system.current_state.clone();

        self.signals.publish(FlowSignal::TurnStarted {
            session_id: session_id.clone(),
            flow_id: flow.id.clone(),
            state: state_name.clone(),
            turn_id,
        });

        let state = flow
            .state(&state_name)
            .ok_or_else(|| FlowError::UnknownState(state_name.clone()))?;

        // Interrupts resolve before anything else in the turn.
        match check_interrupt(flow, state, context) {
            InterruptOutcome::None => {}
            InterruptOutcome::Cancelled { target, intent } => {
                stats.interrupted = true;
                self.signals.publish(FlowSignal::InterruptHandled {
                    session_id,
                    state: state_name,
                    intent,
                });
                info!(cancel_target = target.as_str(), "cancel intent, forcing transition");
                let completed = flow.is_final_state(&target);
                context.system.current_state = target.clone();
                return Ok(TurnOutcome {
                    next_state: Some(target),
                    event: Some(events::CANCEL.to_string()),
                    completed,
                    error: None,
                });
            }
            InterruptOutcome::CancelUnroutable { intent } => {
                stats.interrupted = true;
                self.signals.publish(FlowSignal::InterruptHandled {
                    session_id: session_id.clone(),
                    state: state_name.clone(),
                    intent: intent.clone(),
                });
                context.system.push_error(
                    ErrorRecord::new(
                        state_name.clone(),
                        None,
                        format!("cancel intent '{intent}' has no target state"),
                    ),
                    self.settings.max_error_history,
                );
                warn!(intent = intent.as_str(), "cancel intent with no target state, continuing turn");
            }
            InterruptOutcome::Noted { intent } => {
                stats.interrupted = true;
                self.signals.publish(FlowSignal::InterruptHandled {
                    session_id: session_id.clone(),
                    state: state_name.clone(),
                    intent: intent.clone(),
                });
                debug!(intent = intent.as_str(), "interrupt noted, turn continues");
            }
        }

        if state.kind.is_terminal() {
            debug!("turn started in a terminal state");
            return Ok(TurnOutcome {
                next_state: None,
                event: Some(events::COMPLETED.to_string()),
                completed: true,
                error: None,
            });
        }

        let mut summary = ActionsSummary::default();

        // Entry actions only run the first time a state is entered.
        if incoming.is_none() && !state.on_entry.is_empty() {
            self.run_actions(&session_id, &state_name, &state.on_entry, context, &mut summary, stats)
                .await;
            if let Some(message) = summary.fatal.clone() {
                return Ok(TurnOutcome::fatal(message));
            }
        }

        // A wait state entered without an event blocks for input: no
        // transition, ever, regardless of declared defaults.
        if state.kind == StateKind::Wait && incoming.is_none() {
            debug!("wait state blocking for input");
            return Ok(TurnOutcome {
                next_state: None,
                event: None,
                completed: false,
                error: None,
            });
        }

        // Input gate for resumed wait states.
        if state.kind == StateKind::Wait {
            if let Some(config) = &state.validator {
                if let Some(incoming_event) = incoming {
                    let gate = self
                        .validate_wait_input(flow, &state_name, config, incoming_event, context)
                        .await;
                    if let Some(outcome) = gate {
                        return Ok(outcome);
                    }
                }
            }
        }

        // Decision states run no actions; everything else runs the main list.
        if state.kind != StateKind::Decision {
            self.run_actions(&session_id, &state_name, &state.actions, context, &mut summary, stats)
                .await;
            if let Some(message) = summary.fatal.clone() {
                return Ok(TurnOutcome::fatal(message));
            }
        }

        let decision_event = if state.kind == StateKind::Decision {
            self.pick_decision_event(state, context)?
        } else {
            None
        };

        let triggered = resolve_event(state.kind, incoming, &summary, decision_event);

        let next_state: Option<String> = match triggered.as_deref() {
            Some(event) => {
                let direct = state.transition(event);
                let fallback = if direct.is_none() && event != events::DEFAULT {
                    state.transition(events::DEFAULT)
                } else {
                    None
                };
                direct.or(fallback).map(str::to_string)
            }
            None => state.transition(events::DEFAULT).map(str::to_string),
        };

        // Exit actions fire only when the engine actually leaves the state.
        // Their failures are recorded but never block the transition, and
        // any events they return are ignored.
        if next_state.is_some() && !state.on_exit.is_empty() {
            let mut exit_summary = ActionsSummary::default();
            self.run_actions(&session_id, &state_name, &state.on_exit, context, &mut exit_summary, stats)
                .await;
        }

        let completed = match &next_state {
            Some(next) => flow.is_final_state(next),
            None => state.is_dead_end(),
        };

        if let Some(next) = &next_state {
            context.system.current_state = next.clone();
            info!(next_state = next.as_str(), event = ?triggered, "transitioning");
        }

        Ok(TurnOutcome {
            next_state,
            event: triggered,
            completed,
            error: None,
        })
    }

    /// Validate staged user input for a resumed wait state.
    ///
    /// Returns `None` when the input passed and the turn should continue
    /// into the state's actions, or `Some(outcome)` to end the turn here
    /// (remain with an error, or escape through `on_invalid`).
    async fn validate_wait_input(
        &self,
        flow: &FlowDefinition,
        state_name: &str,
        config: &ValidatorConfig,
        incoming: &str,
        context: &mut ExecutionContext,
    ) -> Option<TurnOutcome> {
        // The caller stages raw input under `_user_input`; the event name
        // itself is the fallback signal.
        let input = context
            .user_input()
            .cloned()
            .unwrap_or_else(|| Value::String(incoming.to_string()));

        let outcome = self.validator.validate(config, &input, context).await;
        if outcome.valid {
            let extracted = outcome.extracted.unwrap_or(input);
            let output_path = config.output.as_deref().unwrap_or(keys::VALIDATED_INPUT);
            set_path(&mut context.data, output_path, extracted);
            context.reset_validation_failures(state_name);
            context.clear_validation_error();
            return None;
        }

        let failures = context.bump_validation_failures(state_name);
        let reason = outcome
            .reason
            .unwrap_or_else(|| "invalid input".to_string());
        let suggested = outcome
            .suggested_response
            .or_else(|| config.prompt.clone());
        context.set_validation_error(reason.clone(), suggested);
        self.signals.publish(FlowSignal::ValidationFailed {
            session_id: context.system.session_id.clone(),
            state: state_name.to_string(),
            failures,
            reason: reason.clone(),
        });

        // A validator-level 0 means "use the engine default".
        let max_failures = if config.max_failures == 0 {
            self.settings.default_max_validation_failures
        } else {
            config.max_failures
        };

        if failures >= max_failures {
            if let Some(escape) = &config.on_invalid {
                info!(
                    escape = escape.as_str(),
                    failures, "validation attempts exhausted, escaping"
                );
                context.reset_validation_failures(state_name);
                let completed = flow.is_final_state(escape);
                context.system.current_state = escape.clone();
                return Some(TurnOutcome {
                    next_state: Some(escape.clone()),
                    event: None,
                    completed,
                    error: Some(reason),
                });
            }
        }

        Some(TurnOutcome {
            next_state: None,
            event: None,
            completed: false,
            error: Some(reason),
        })
    }

    /// Run an action list strictly in order, folding outcomes into `summary`.
    ///
    /// Returns early when a `fail`-policy action fails, leaving the abort
    /// message in `summary.fatal`.
    async fn run_actions(
        &self,
        session_id: &str,
        state_name: &str,
        actions: &[ActionDefinition],
        context: &mut ExecutionContext,
        summary: &mut ActionsSummary,
        stats: &mut TurnStats,
    ) {
        for action in actions {
            let outcome = self.run_action(session_id, state_name, action, context).await;
            stats.actions_run += 1;

            // Later actions override earlier explicit events.
            if let Some(event) = &outcome.event {
                summary.event = Some(event.clone());
            }

            if outcome.success {
                if let (Some(path), Some(value)) = (&action.output, &outcome.output) {
                    set_path(&mut context.data, path, value.clone());
                }
                continue;
            }

            summary.any_failed = true;
            let message = outcome
                .error
                .clone()
                .unwrap_or_else(|| format!("executor '{}' failed", action.executor));
            context.system.push_error(
                ErrorRecord::new(state_name, Some(action.executor.clone()), message.clone()),
                self.settings.max_error_history,
            );

            if action.on_error == OnErrorPolicy::Fail {
                warn!(
                    executor = action.executor.as_str(),
                    error = message.as_str(),
                    "action failed, aborting remaining actions"
                );
                summary.fatal = Some(message);
                return;
            }
            debug!(
                executor = action.executor.as_str(),
                policy = ?action.on_error,
                "action failed, continuing"
            );
        }
    }

    /// Run one action: interpolate its config, then attempt it under the
    /// declared retry policy. Never panics; executor panics are folded into
    /// a failed outcome.
    async fn run_action(
        &self,
        session_id: &str,
        state_name: &str,
        action: &ActionDefinition,
        context: &mut ExecutionContext,
    ) -> ActionOutcome {
        self.signals.publish(FlowSignal::ActionStarted {
            session_id: session_id.to_string(),
            state: state_name.to_string(),
            executor: action.executor.clone(),
        });

        // Interpolation failures are deterministic, so the retry policy
        // never sees them.
        let config = match interpolate_object(&action.config, &context.data) {
            Ok(config) => config,
            Err(e) => {
                let message = format!("config interpolation failed: {e}");
                self.signals.publish(FlowSignal::ActionFailed {
                    session_id: session_id.to_string(),
                    state: state_name.to_string(),
                    executor: action.executor.clone(),
                    error: message.clone(),
                    will_retry: false,
                });
                return ActionOutcome::fail(message);
            }
        };

        let mut attempt: u32 = 1;
        loop {
            let attempt_started = Instant::now();
            let call = self.registry.execute(&action.executor, &config, context);
            let outcome = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => ActionOutcome::fail(e.to_string()),
                Err(_) => ActionOutcome::fail(format!("executor '{}' panicked", action.executor)),
            };

            if outcome.success {
                self.signals.publish(FlowSignal::ActionCompleted {
                    session_id: session_id.to_string(),
                    state: state_name.to_string(),
                    executor: action.executor.clone(),
                    duration_ms: attempt_started.elapsed().as_millis() as u64,
                });
                return outcome;
            }

            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "action failed".to_string());
            let will_retry = should_retry(action.on_error, attempt, action.max_retries);
            self.signals.publish(FlowSignal::ActionFailed {
                session_id: session_id.to_string(),
                state: state_name.to_string(),
                executor: action.executor.clone(),
                error: error.clone(),
                will_retry,
            });

            if !will_retry {
                return outcome;
            }

            let delay = backoff_delay(
                Duration::from_millis(self.settings.base_retry_delay_ms),
                attempt,
            );
            debug!(
                executor = action.executor.as_str(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "action failed, backing off before retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// First truthy condition wins; a malformed expression aborts the turn.
    fn pick_decision_event(
        &self,
        state: &StateDefinition,
        context: &ExecutionContext,
    ) -> Result<Option<String>, FlowError> {
        for rule in &state.conditions {
            let matched = self
                .evaluator
                .evaluate_in_context(&rule.when, context)
                .map_err(|e| FlowError::ExpressionError(e.to_string()))?;
            if matched {
                debug!(event = rule.event.as_str(), "decision condition matched");
                return Ok(Some(rule.event.clone()));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for FlowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowEngine")
            .field("executors", &self.registry.names())
            .field("settings", &self.settings)
            .field("active_sessions", &self.active_sessions.len())
            .finish_non_exhaustive()
    }
}

/// Triggered-event resolution, in priority order:
///
/// 1. An explicit event returned by an action (later actions win).
/// 2. A resumed wait state preserves the incoming event unless the explicit
///    event is specific; `success` and `default` are generic and never mask
///    the input signal.
/// 3. An action state with no explicit event infers `success` when every
///    action succeeded, `error` when any failed.
/// 4. Decision states use their first truthy condition, or nothing.
fn resolve_event(
    kind: StateKind,
    incoming: Option<&str>,
    summary: &ActionsSummary,
    decision_event: Option<String>,
) -> Option<String> {
    match kind {
        StateKind::Decision => decision_event,
        StateKind::Wait => match &summary.event {
            Some(event) if !events::is_generic(event) => Some(event.clone()),
            _ => incoming.map(str::to_string),
        },
        _ => {
            if let Some(event) = &summary.event {
                Some(event.clone())
            } else if summary.any_failed {
                Some(events::ERROR.to_string())
            } else {
                Some(events::SUCCESS.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FlowEngineBuilder
// ---------------------------------------------------------------------------

/// Builder for a `FlowEngine` with non-default collaborators.
pub struct FlowEngineBuilder {
    registry: Arc<ExecutorRegistry>,
    validator: Option<BoxInputValidator>,
    schema_validator: Option<Box<dyn ContextSchemaValidator>>,
    signals: Option<SignalBus>,
    settings: EngineSettings,
}

impl FlowEngineBuilder {
    /// Replace the built-in rule validator for wait-state input.
    pub fn with_validator(mut self, validator: impl InputValidator + 'static) -> Self {
        self.validator = Some(BoxInputValidator::new(validator));
        self
    }

    /// Attach a context schema validator (no-op by default).
    pub fn with_schema_validator(mut self, validator: impl ContextSchemaValidator + 'static) -> Self {
        self.schema_validator = Some(Box::new(validator));
        self
    }

    /// Share an existing signal bus instead of creating a fresh one.
    pub fn with_signal_bus(mut self, signals: SignalBus) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> FlowEngine {
        let settings = self.settings;
        FlowEngine {
            registry: self.registry,
            validator: self
                .validator
                .unwrap_or_else(|| BoxInputValidator::new(RuleValidator::new())),
            schema_validator: self
                .schema_validator
                .unwrap_or_else(|| Box::new(NoopSchemaValidator)),
            evaluator: ConditionEvaluator::new(),
            signals: self
                .signals
                .unwrap_or_else(|| SignalBus::new(settings.signal_capacity)),
            settings,
            active_sessions: DashMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Turn bookkeeping
// ---------------------------------------------------------------------------

/// Per-turn counters surfaced through `TurnMetadata`.
#[derive(Debug, Default)]
struct TurnStats {
    actions_run: u32,
    interrupted: bool,
}

/// What a turn resolved to, before being folded into a `TurnResult`.
#[derive(Debug)]
struct TurnOutcome {
    next_state: Option<String>,
    event: Option<String>,
    completed: bool,
    error: Option<String>,
}

impl TurnOutcome {
    /// A `fail`-policy abort: no transition, the failure surfaces directly.
    fn fatal(message: String) -> Self {
        Self {
            next_state: None,
            event: Some(events::ERROR.to_string()),
            completed: false,
            error: Some(message),
        }
    }
}

/// Rolling summary of an action list's outcomes.
#[derive(Debug, Default)]
struct ActionsSummary {
    /// Last explicit event any action returned.
    event: Option<String>,
    any_failed: bool,
    /// Set when a `fail`-policy action aborted the list.
    fatal: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use serde_json::json;

    use crate::action::builtin::{FnExecutor, SetContextExecutor};
    use crate::flow::definition::parse_flow_yaml;
    use crate::flow::path::get_path;
    use crate::flow::schema::SchemaReport;

    use super::*;

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn test_registry() -> Arc<ExecutorRegistry> {
        Arc::new(
            ExecutorRegistry::new()
                .with(FnExecutor::new("echo", |cfg: &Value, _ctx: &mut ExecutionContext| {
                    let value = cfg.get("value").cloned().unwrap_or(json!("echo"));
                    Ok(ActionOutcome::ok(value))
                }))
                .with(FnExecutor::new(
                    "emit_event",
                    |cfg: &Value, _ctx: &mut ExecutionContext| {
                        let event = cfg
                            .get("event")
                            .and_then(Value::as_str)
                            .unwrap_or("noop")
                            .to_string();
                        Ok(ActionOutcome::ok_with_event(json!(null), event))
                    },
                ))
                .with(FnExecutor::new(
                    "failing",
                    |_cfg: &Value, _ctx: &mut ExecutionContext| Ok(ActionOutcome::fail("boom")),
                ))
                .with(SetContextExecutor::new()),
        )
    }

    fn engine() -> FlowEngine {
        FlowEngine::new(test_registry())
    }

    fn context_for(flow: &FlowDefinition) -> ExecutionContext {
        ExecutionContext::new("sess-1", flow.id.clone(), flow.initial_state.clone())
    }

    const ACTION_FLOW: &str = r#"
id: place_order
module: food
initial_state: greet
final_states: [done, failed]
states:
  greet:
    type: action
    actions:
      - executor: echo
        config:
          value: "Welcome!"
        output: greeting
    transitions:
      success: done
      error: failed
  done:
    type: final
  failed:
    type: final
"#;

    const WAIT_FLOW: &str = r#"
id: collect
module: food
initial_state: collect_address
final_states: [done, failed]
settings:
  cancel_state: failed
states:
  collect_address:
    type: wait
    on_entry:
      - executor: echo
        config:
          value: "Where should we deliver?"
        output: _response
    actions:
      - executor: echo
        config:
          value: processed
        output: processed
    validator:
      rule: non_empty
      output: customer.address
      max_failures: 2
      on_invalid: failed
      prompt: "Please give me a street address."
    transitions:
      user_message: confirm
      address_valid: confirm
      cancel: failed
  confirm:
    type: action
    actions:
      - executor: echo
        config:
          value: confirmed
    transitions:
      success: done
  done:
    type: final
  failed:
    type: final
"#;

    const DECISION_FLOW: &str = r#"
id: route_order
module: food
initial_state: route
final_states: [delivery, pickup, fallback]
states:
  route:
    type: decision
    conditions:
      - when: "data.order.mode == 'delivery'"
        event: wants_delivery
      - when: "data.order.mode == 'pickup'"
        event: wants_pickup
    transitions:
      wants_delivery: delivery
      wants_pickup: pickup
      default: fallback
  delivery:
    type: final
  pickup:
    type: final
  fallback:
    type: final
"#;

    // -----------------------------------------------------------------------
    // Action states
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn action_state_all_success_infers_success_and_completes() {
        let flow = parse_flow_yaml(ACTION_FLOW).unwrap();
        let engine = engine();
        let ctx = context_for(&flow);

        let result = engine.execute_state(&flow, ctx, None).await;

        assert_eq!(result.next_state.as_deref(), Some("done"));
        assert_eq!(result.event.as_deref(), Some("success"));
        assert!(result.completed);
        assert!(result.error.is_none());
        assert_eq!(result.context.system.current_state, "done");
        assert_eq!(result.context.system.turn_count, 1);
        assert_eq!(get_path(&result.context.data, "greeting"), Some(&json!("Welcome!")));
        assert_eq!(result.metadata.state, "greet");
        assert_eq!(result.metadata.actions_run, 1);
        assert!(!result.metadata.interrupted);
    }

    #[tokio::test]
    async fn action_state_failure_infers_error_event() {
        let yaml = r#"
id: fragile
module: food
initial_state: start
final_states: [done, failed]
states:
  start:
    type: action
    actions:
      - executor: failing
        on_error: continue
      - executor: echo
        output: after
    transitions:
      success: done
      error: failed
  done:
    type: final
  failed:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        // continue policy: the failure is recorded, the list keeps going.
        assert_eq!(get_path(&result.context.data, "after"), Some(&json!("echo")));
        assert_eq!(result.event.as_deref(), Some("error"));
        assert_eq!(result.next_state.as_deref(), Some("failed"));
        assert!(result.completed);
        assert!(result.error.is_none());
        let history = &result.context.system.error_history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].executor.as_deref(), Some("failing"));
    }

    #[tokio::test]
    async fn fail_policy_aborts_remaining_actions() {
        let yaml = r#"
id: fragile
module: food
initial_state: start
final_states: [done]
states:
  start:
    type: action
    actions:
      - executor: failing
      - executor: echo
        output: after
    transitions:
      success: done
      error: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        // Default policy is fail: the second action never runs and no
        // transition happens, even though an error transition is declared.
        assert_eq!(get_path(&result.context.data, "after"), None);
        assert!(result.next_state.is_none());
        assert!(!result.completed);
        assert_eq!(result.event.as_deref(), Some("error"));
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert_eq!(result.metadata.actions_run, 1);
    }

    #[tokio::test]
    async fn dead_end_action_state_completes() {
        let yaml = r#"
id: one_shot
module: food
initial_state: start
final_states: [start]
states:
  start:
    type: action
    actions:
      - executor: echo
"#;
        // A state with no transitions at all is a dead end; finishing it
        // completes the conversation.
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert!(result.next_state.is_none());
        assert_eq!(result.event.as_deref(), Some("success"));
        assert!(result.completed);
    }

    #[tokio::test]
    async fn explicit_action_event_drives_transition() {
        let yaml = r#"
id: eventful
module: food
initial_state: start
final_states: [special, done]
states:
  start:
    type: action
    actions:
      - executor: emit_event
        config:
          event: go_special
    transitions:
      go_special: special
      success: done
  special:
    type: final
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert_eq!(result.event.as_deref(), Some("go_special"));
        assert_eq!(result.next_state.as_deref(), Some("special"));
    }

    #[tokio::test]
    async fn unmatched_event_falls_back_to_default_transition() {
        let yaml = r#"
id: defaulting
module: food
initial_state: start
final_states: [done]
states:
  start:
    type: action
    actions:
      - executor: emit_event
        config:
          event: something_odd
    transitions:
      default: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert_eq!(result.event.as_deref(), Some("something_odd"));
        assert_eq!(result.next_state.as_deref(), Some("done"));
        assert!(result.completed);
    }

    // -----------------------------------------------------------------------
    // Wait states
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn wait_state_first_entry_blocks() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert!(result.next_state.is_none());
        assert!(!result.completed);
        assert!(result.event.is_none());
        // Entry actions ran before blocking.
        assert_eq!(
            get_path(&result.context.data, "_response"),
            Some(&json!("Where should we deliver?"))
        );
        assert_eq!(result.metadata.actions_run, 1);
        // Still in the wait state.
        assert_eq!(result.context.system.current_state, "collect_address");
    }

    #[tokio::test]
    async fn wait_state_resume_preserves_incoming_event() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_user_input(json!("42 Baker Street"));

        let result = engine.execute_state(&flow, ctx, Some("user_message")).await;

        // The echo action returns no event, so the incoming one survives.
        assert_eq!(result.event.as_deref(), Some("user_message"));
        assert_eq!(result.next_state.as_deref(), Some("confirm"));
        assert!(!result.completed);
        // Entry actions do not re-run on resume.
        assert_eq!(get_path(&result.context.data, "_response"), None);
        // Validated input landed at the configured path.
        assert_eq!(
            get_path(&result.context.data, "customer.address"),
            Some(&json!("42 Baker Street"))
        );
    }

    #[tokio::test]
    async fn wait_state_specific_action_event_overrides_incoming() {
        let yaml = r#"
id: collect
module: food
initial_state: ask
final_states: [done, special]
states:
  ask:
    type: wait
    actions:
      - executor: emit_event
        config:
          event: address_valid
    transitions:
      user_message: done
      address_valid: special
  done:
    type: final
  special:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine
            .execute_state(&flow, context_for(&flow), Some("user_message"))
            .await;

        assert_eq!(result.event.as_deref(), Some("address_valid"));
        assert_eq!(result.next_state.as_deref(), Some("special"));
    }

    #[tokio::test]
    async fn wait_state_generic_action_event_does_not_mask_incoming() {
        let yaml = r#"
id: collect
module: food
initial_state: ask
final_states: [done, other]
states:
  ask:
    type: wait
    actions:
      - executor: emit_event
        config:
          event: success
    transitions:
      user_message: done
      success: other
  done:
    type: final
  other:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine
            .execute_state(&flow, context_for(&flow), Some("user_message"))
            .await;

        // `success` is generic and must not mask the resumed input signal.
        assert_eq!(result.event.as_deref(), Some("user_message"));
        assert_eq!(result.next_state.as_deref(), Some("done"));
    }

    // -----------------------------------------------------------------------
    // Validation gate
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn validation_failure_remains_in_state_with_error() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_user_input(json!(""));

        let result = engine.execute_state(&flow, ctx, Some("user_message")).await;

        assert!(result.next_state.is_none());
        assert!(!result.completed);
        assert!(result.error.is_some());
        assert_eq!(result.context.validation_failures("collect_address"), 1);
        assert_eq!(
            result.context.data[keys::SUGGESTED_RESPONSE],
            "Please give me a street address."
        );
        // The state's actions never ran.
        assert_eq!(get_path(&result.context.data, "processed"), None);
        assert_eq!(result.context.system.current_state, "collect_address");
    }

    #[tokio::test]
    async fn validation_failures_exhaust_to_on_invalid() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_user_input(json!(""));

        let first = engine.execute_state(&flow, ctx, Some("user_message")).await;
        assert!(first.next_state.is_none());

        // Second failure reaches max_failures: 2 and escapes.
        let second = engine
            .execute_state(&flow, first.context, Some("user_message"))
            .await;

        assert_eq!(second.next_state.as_deref(), Some("failed"));
        assert!(second.completed);
        assert!(second.error.is_some());
        assert_eq!(second.context.system.current_state, "failed");
        // Counter resets when the escape fires.
        assert_eq!(second.context.validation_failures("collect_address"), 0);
    }

    #[tokio::test]
    async fn validation_success_resets_counter_and_clears_error() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_user_input(json!(""));

        let failed = engine.execute_state(&flow, ctx, Some("user_message")).await;
        assert_eq!(failed.context.validation_failures("collect_address"), 1);

        let mut ctx = failed.context;
        ctx.set_user_input(json!("42 Baker Street"));
        let result = engine.execute_state(&flow, ctx, Some("user_message")).await;

        assert_eq!(result.next_state.as_deref(), Some("confirm"));
        assert_eq!(result.context.validation_failures("collect_address"), 0);
        assert!(!result.context.data.contains_key(keys::VALIDATION_ERROR));
        // Actions ran after the gate passed.
        assert_eq!(get_path(&result.context.data, "processed"), Some(&json!("processed")));
    }

    #[tokio::test]
    async fn validation_input_falls_back_to_event_name() {
        let yaml = r#"
id: pick
module: food
initial_state: choose
final_states: [done]
states:
  choose:
    type: wait
    validator:
      rule: one_of
      params:
        choices: [pickup, delivery]
    transitions:
      default: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        // No staged `_user_input`: the event name itself is validated.
        let result = engine
            .execute_state(&flow, context_for(&flow), Some("pickup"))
            .await;

        assert_eq!(result.next_state.as_deref(), Some("done"));
        assert_eq!(
            get_path(&result.context.data, keys::VALIDATED_INPUT),
            Some(&json!("pickup"))
        );
    }

    // -----------------------------------------------------------------------
    // Decision states
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn decision_state_picks_first_truthy_condition() {
        let flow = parse_flow_yaml(DECISION_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.data.insert("order".to_string(), json!({"mode": "pickup"}));

        let result = engine.execute_state(&flow, ctx, None).await;

        assert_eq!(result.event.as_deref(), Some("wants_pickup"));
        assert_eq!(result.next_state.as_deref(), Some("pickup"));
        assert!(result.completed);
        assert_eq!(result.metadata.actions_run, 0);
    }

    #[tokio::test]
    async fn decision_state_no_match_falls_to_default() {
        let flow = parse_flow_yaml(DECISION_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.data.insert("order".to_string(), json!({"mode": "dine_in"}));

        let result = engine.execute_state(&flow, ctx, None).await;

        assert!(result.event.is_none());
        assert_eq!(result.next_state.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn malformed_condition_is_caught_as_engine_error() {
        let yaml = r#"
id: broken
module: food
initial_state: route
final_states: [done]
states:
  route:
    type: decision
    conditions:
      - when: "data.order.mode =="
        event: go
    transitions:
      go: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert!(result.next_state.is_none());
        assert!(!result.completed);
        assert!(result.error.is_some());
        assert_eq!(result.context.system.error_history.len(), 1);
        // The session stays where it was.
        assert_eq!(result.context.system.current_state, "route");
    }

    // -----------------------------------------------------------------------
    // Retry policy
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn retry_policy_attempts_until_success_with_backoff() {
        let attempts = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&attempts);
        let registry = Arc::new(ExecutorRegistry::new().with(FnExecutor::new(
            "flaky",
            move |_cfg: &Value, _ctx: &mut ExecutionContext| {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Ok(ActionOutcome::fail(format!("transient {n}")))
                } else {
                    Ok(ActionOutcome::ok(json!(n)))
                }
            },
        )));
        let engine = FlowEngine::new(registry);
        let yaml = r#"
id: flaky_flow
module: food
initial_state: start
final_states: [done]
states:
  start:
    type: action
    actions:
      - executor: flaky
        output: tries
        on_error: retry
        max_retries: 2
    transitions:
      success: done
      error: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let virtual_start = tokio::time::Instant::now();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        // Two failures, then success on the third try.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(result.event.as_deref(), Some("success"));
        assert_eq!(get_path(&result.context.data, "tries"), Some(&json!(3)));
        // Backoff slept base then 2x base (1000ms default).
        assert!(virtual_start.elapsed() >= Duration::from_millis(3000));
        // Failed attempts are still recorded for diagnostics.
        assert_eq!(result.context.system.error_history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_records_failure_and_continues_list() {
        let registry = Arc::new(
            ExecutorRegistry::new()
                .with(FnExecutor::new(
                    "always_failing",
                    |_cfg: &Value, _ctx: &mut ExecutionContext| Ok(ActionOutcome::fail("still down")),
                ))
                .with(FnExecutor::new("echo", |_cfg: &Value, _ctx: &mut ExecutionContext| {
                    Ok(ActionOutcome::ok(json!("ran")))
                })),
        );
        let engine = FlowEngine::new(registry);
        let yaml = r#"
id: exhausted
module: food
initial_state: start
final_states: [done, failed]
states:
  start:
    type: action
    actions:
      - executor: always_failing
        on_error: retry
        max_retries: 1
      - executor: echo
        output: after
    transitions:
      success: done
      error: failed
  done:
    type: final
  failed:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        // Exhausted retries behave like continue: the list keeps going.
        assert_eq!(get_path(&result.context.data, "after"), Some(&json!("ran")));
        assert_eq!(result.event.as_deref(), Some("error"));
        assert_eq!(result.next_state.as_deref(), Some("failed"));
        assert!(result.error.is_none());
        // One history record per failed attempt's final outcome.
        assert_eq!(result.context.system.error_history.len(), 1);
    }

    #[tokio::test]
    async fn executor_panic_becomes_failed_action() {
        let registry = Arc::new(ExecutorRegistry::new().with(FnExecutor::new(
            "panicky",
            |_cfg: &Value, _ctx: &mut ExecutionContext| -> anyhow::Result<ActionOutcome> {
                panic!("kaboom")
            },
        )));
        let engine = FlowEngine::new(registry);
        let yaml = r#"
id: panics
module: food
initial_state: start
final_states: [done]
states:
  start:
    type: action
    actions:
      - executor: panicky
    transitions:
      success: done
      error: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert!(!result.completed);
        let error = result.error.as_deref().unwrap_or_default();
        assert!(error.contains("panicked"), "unexpected error: {error}");
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn cancel_interrupt_forces_transition_to_cancel_target() {
        let yaml = r#"
id: cancelable
module: food
initial_state: collect
final_states: [done, cancelled]
states:
  collect:
    type: wait
    transitions:
      user_message: done
      cancel: cancelled
  done:
    type: final
  cancelled:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_intent_interrupt("cancel");

        let result = engine.execute_state(&flow, ctx, None).await;

        assert_eq!(result.next_state.as_deref(), Some("cancelled"));
        assert_eq!(result.event.as_deref(), Some("cancel"));
        assert!(result.completed);
        assert!(result.metadata.interrupted);
        // Flag cleared after handling.
        assert!(!result.context.intent_interrupt());
        assert_eq!(result.context.system.current_state, "cancelled");
    }

    #[tokio::test]
    async fn help_interrupt_sets_flag_and_turn_continues() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_intent_interrupt("help");

        let result = engine.execute_state(&flow, ctx, None).await;

        // The wait state still blocks normally.
        assert!(result.next_state.is_none());
        assert!(!result.completed);
        assert!(result.metadata.interrupted);
        assert!(result.context.help_requested());
        // Entry actions still ran.
        assert_eq!(
            get_path(&result.context.data, "_response"),
            Some(&json!("Where should we deliver?"))
        );
    }

    #[tokio::test]
    async fn flow_switch_interrupt_recorded_for_caller() {
        let flow = parse_flow_yaml(WAIT_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.set_intent_interrupt("track_parcel");

        let result = engine.execute_state(&flow, ctx, None).await;

        assert_eq!(result.context.pending_flow_switch(), Some("track_parcel"));
        assert!(result.metadata.interrupted);
        assert!(!result.completed);
    }

    // -----------------------------------------------------------------------
    // Terminal states and engine errors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn terminal_state_reports_completed() {
        let flow = parse_flow_yaml(ACTION_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.system.current_state = "done".to_string();

        let result = engine.execute_state(&flow, ctx, None).await;

        assert!(result.completed);
        assert_eq!(result.event.as_deref(), Some("completed"));
        assert!(result.next_state.is_none());
        assert_eq!(result.metadata.actions_run, 0);
    }

    #[tokio::test]
    async fn unknown_current_state_is_an_engine_error() {
        let flow = parse_flow_yaml(ACTION_FLOW).unwrap();
        let engine = engine();
        let mut ctx = context_for(&flow);
        ctx.system.current_state = "nowhere".to_string();

        let result = engine.execute_state(&flow, ctx, None).await;

        assert!(!result.completed);
        let error = result.error.as_deref().unwrap_or_default();
        assert!(error.contains("unknown state"), "unexpected error: {error}");
        assert_eq!(result.context.system.error_history.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Exit actions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn exit_actions_run_only_when_leaving() {
        let yaml = r#"
id: exits
module: food
initial_state: ask
final_states: [done]
states:
  ask:
    type: wait
    on_exit:
      - executor: set_context
        config:
          values:
            left_ask: true
    transitions:
      user_message: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let blocked = engine.execute_state(&flow, context_for(&flow), None).await;
        assert_eq!(get_path(&blocked.context.data, "left_ask"), None);

        let resumed = engine
            .execute_state(&flow, blocked.context, Some("user_message"))
            .await;
        assert_eq!(resumed.next_state.as_deref(), Some("done"));
        assert_eq!(get_path(&resumed.context.data, "left_ask"), Some(&json!(true)));
        assert_eq!(resumed.metadata.actions_run, 1);
    }

    #[tokio::test]
    async fn exit_action_failure_does_not_block_transition() {
        let yaml = r#"
id: exits
module: food
initial_state: ask
final_states: [done]
states:
  ask:
    type: wait
    on_exit:
      - executor: failing
    transitions:
      user_message: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        let result = engine
            .execute_state(&flow, context_for(&flow), Some("user_message"))
            .await;

        assert_eq!(result.next_state.as_deref(), Some("done"));
        assert!(result.completed);
        assert!(result.error.is_none());
        // The failure still landed in the history.
        assert_eq!(result.context.system.error_history.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Re-entrancy and schema checks
    // -----------------------------------------------------------------------

    struct Gate {
        release: Arc<tokio::sync::Notify>,
    }

    impl crate::action::ActionExecutor for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn execute(
            &self,
            _config: &Value,
            _context: &mut ExecutionContext,
        ) -> anyhow::Result<ActionOutcome> {
            self.release.notified().await;
            Ok(ActionOutcome::ok(json!("released")))
        }
    }

    #[tokio::test]
    async fn concurrent_turn_for_same_session_is_rejected() {
        let release = Arc::new(tokio::sync::Notify::new());
        let registry = Arc::new(ExecutorRegistry::new().with(Gate {
            release: Arc::clone(&release),
        }));
        let engine = Arc::new(FlowEngine::new(registry));
        let yaml = r#"
id: slow
module: food
initial_state: start
final_states: [done]
states:
  start:
    type: action
    actions:
      - executor: gate
    transitions:
      success: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let ctx = context_for(&flow);

        let first = {
            let engine = Arc::clone(&engine);
            let flow = flow.clone();
            tokio::spawn(async move { engine.execute_state(&flow, ctx, None).await })
        };
        // Let the first turn reach its gate.
        while engine.active_sessions.is_empty() {
            tokio::task::yield_now().await;
        }

        let second = engine
            .execute_state(&flow, context_for(&flow), None)
            .await;
        let error = second.error.as_deref().unwrap_or_default();
        assert!(error.contains("already in progress"), "unexpected error: {error}");
        // The rejected turn never counted.
        assert_eq!(second.context.system.turn_count, 0);

        release.notify_one();
        let first = first.await.unwrap();
        assert_eq!(first.next_state.as_deref(), Some("done"));
    }

    struct RejectingSchema;

    impl ContextSchemaValidator for RejectingSchema {
        fn validate(&self, _schema: &str, _data: &serde_json::Map<String, Value>) -> SchemaReport {
            SchemaReport {
                valid: false,
                errors: vec!["missing required field 'order'".to_string()],
                warnings: vec![],
            }
        }
    }

    #[tokio::test]
    async fn schema_failures_never_fail_the_turn() {
        let yaml = r#"
id: checked
module: food
initial_state: start
final_states: [done]
context_schema: order_context
states:
  start:
    type: action
    actions:
      - executor: echo
    transitions:
      success: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = FlowEngine::builder(test_registry())
            .with_schema_validator(RejectingSchema)
            .build();

        let result = engine.execute_state(&flow, context_for(&flow), None).await;

        assert_eq!(result.next_state.as_deref(), Some("done"));
        assert!(result.completed);
        assert!(result.error.is_none());
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn turn_lifecycle_publishes_signals_in_order() {
        let flow = parse_flow_yaml(ACTION_FLOW).unwrap();
        let engine = engine();
        let mut rx = engine.signals().subscribe();

        engine.execute_state(&flow, context_for(&flow), None).await;

        let mut kinds = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            kinds.push(match signal {
                FlowSignal::TurnStarted { .. } => "turn_started",
                FlowSignal::ActionStarted { .. } => "action_started",
                FlowSignal::ActionCompleted { .. } => "action_completed",
                FlowSignal::ActionFailed { .. } => "action_failed",
                FlowSignal::ValidationFailed { .. } => "validation_failed",
                FlowSignal::InterruptHandled { .. } => "interrupt_handled",
                FlowSignal::TurnCompleted { .. } => "turn_completed",
            });
        }
        assert_eq!(
            kinds,
            vec!["turn_started", "action_started", "action_completed", "turn_completed"]
        );
    }

    // -----------------------------------------------------------------------
    // End to end
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn end_to_end_flow_drives_to_completion() {
        let yaml = r#"
id: echo_order
module: food
initial_state: greet
final_states: [done]
states:
  greet:
    type: action
    actions:
      - executor: echo
        config:
          value: "What would you like?"
        output: _response
    transitions:
      success: take_order
  take_order:
    type: wait
    on_entry:
      - executor: echo
        config:
          value: "Listening..."
        output: _response
    validator:
      rule: non_empty
      output: order.item
    transitions:
      user_message: done
  done:
    type: final
"#;
        let flow = parse_flow_yaml(yaml).unwrap();
        let engine = engine();

        // Turn 1: greet runs its action and hands off to the wait state.
        let t1 = engine.execute_state(&flow, context_for(&flow), None).await;
        assert_eq!(t1.next_state.as_deref(), Some("take_order"));
        assert!(!t1.completed);

        // Turn 2: first entry into the wait state blocks for input.
        let t2 = engine.execute_state(&flow, t1.context, None).await;
        assert!(t2.next_state.is_none());
        assert!(!t2.completed);
        assert_eq!(
            get_path(&t2.context.data, "_response"),
            Some(&json!("Listening..."))
        );

        // Turn 3: user input resumes the wait state and finishes the flow.
        let mut ctx = t2.context;
        ctx.set_user_input(json!("one margherita"));
        let t3 = engine.execute_state(&flow, ctx, Some("user_message")).await;
        assert_eq!(t3.next_state.as_deref(), Some("done"));
        assert!(t3.completed);
        assert_eq!(
            get_path(&t3.context.data, "order.item"),
            Some(&json!("one margherita"))
        );
        assert_eq!(t3.context.system.turn_count, 3);
    }

    #[tokio::test]
    async fn validate_delegates_to_registry_audit() {
        let flow = parse_flow_yaml(ACTION_FLOW).unwrap();
        let engine = engine();
        assert!(engine.validate(&flow).valid);

        let strangers = FlowEngine::new(Arc::new(ExecutorRegistry::new()));
        let report = strangers.validate(&flow);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("echo")));
    }
}
