//! Built-in executors.
//!
//! Two context-only executors cover the common cases that need no external
//! integration, plus a closure adapter used heavily in tests.

use serde_json::Value;

use ordino_types::context::{keys, ExecutionContext};
use ordino_types::error::ExecutorError;
use ordino_types::turn::ActionOutcome;

use crate::flow::path::set_path;

use super::executor::ActionExecutor;

// ---------------------------------------------------------------------------
// SetContextExecutor
// ---------------------------------------------------------------------------

/// Writes values into the session context.
///
/// Config shape:
///
/// ```yaml
/// values:
///   order.status: confirmed
///   order.total: "{{ cart.total }}"
/// ```
///
/// Keys are dot paths into the context data; values arrive already
/// interpolated. The outcome carries no output payload, the writes are the
/// whole effect.
#[derive(Debug, Default)]
pub struct SetContextExecutor;

impl SetContextExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ActionExecutor for SetContextExecutor {
    fn name(&self) -> &str {
        "set_context"
    }

    async fn execute(
        &self,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let values = config
            .get("values")
            .and_then(Value::as_object)
            .ok_or_else(|| anyhow::anyhow!("set_context config requires a 'values' object"))?;

        for (path, value) in values {
            set_path(&mut context.data, path, value.clone());
        }

        Ok(ActionOutcome {
            success: true,
            output: None,
            event: None,
            error: None,
        })
    }

    fn validate_config(&self, config: &Value) -> anyhow::Result<()> {
        match config.get("values") {
            Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(ExecutorError::InvalidConfig(
                "set_context 'values' must be an object".to_string(),
            )
            .into()),
            None => Err(ExecutorError::InvalidConfig(
                "set_context config requires a 'values' object".to_string(),
            )
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// StaticResponseExecutor
// ---------------------------------------------------------------------------

/// Emits a canned response message.
///
/// The interpolated `message` is written to the context (at the config
/// `output` path, `_response` by default) and returned as the outcome
/// output so downstream layers can pick it up either way.
#[derive(Debug, Default)]
pub struct StaticResponseExecutor;

impl StaticResponseExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl ActionExecutor for StaticResponseExecutor {
    fn name(&self) -> &str {
        "static_response"
    }

    async fn execute(
        &self,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ActionOutcome> {
        let message = config
            .get("message")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("static_response config requires a 'message' string"))?;

        let output_path = config
            .get("output")
            .and_then(Value::as_str)
            .unwrap_or(keys::RESPONSE);
        set_path(&mut context.data, output_path, Value::String(message.to_string()));

        Ok(ActionOutcome::ok(Value::String(message.to_string())))
    }

    fn validate_config(&self, config: &Value) -> anyhow::Result<()> {
        match config.get("message") {
            Some(Value::String(_)) => Ok(()),
            Some(_) => Err(ExecutorError::InvalidConfig(
                "static_response 'message' must be a string".to_string(),
            )
            .into()),
            None => Err(ExecutorError::InvalidConfig(
                "static_response config requires a 'message' string".to_string(),
            )
            .into()),
        }
    }
}

// ---------------------------------------------------------------------------
// FnExecutor
// ---------------------------------------------------------------------------

/// Closure-backed executor, mainly for tests and one-off wiring.
pub struct FnExecutor<F> {
    name: String,
    f: F,
}

impl<F> FnExecutor<F>
where
    F: Fn(&Value, &mut ExecutionContext) -> anyhow::Result<ActionOutcome> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> ActionExecutor for FnExecutor<F>
where
    F: Fn(&Value, &mut ExecutionContext) -> anyhow::Result<ActionOutcome> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(
        &self,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ActionOutcome> {
        (self.f)(config, context)
    }
}
