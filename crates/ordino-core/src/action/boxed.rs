//! Object-safe executor wrapper.
//!
//! [`ActionExecutor`] returns `impl Future`, which keeps implementations
//! allocation-free but rules out `dyn ActionExecutor`. The registry needs to
//! hold executors of different concrete types, so this module provides the
//! boxing bridge: [`ActionExecutorDyn`] is the object-safe mirror (blanket
//! implemented for every executor), and [`BoxActionExecutor`] wraps it back
//! into an ergonomic owned handle.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use ordino_types::context::ExecutionContext;
use ordino_types::turn::ActionOutcome;

use super::executor::ActionExecutor;

/// Object-safe mirror of [`ActionExecutor`].
pub trait ActionExecutorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        config: &'a Value,
        context: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionOutcome>> + Send + 'a>>;

    fn validate_config_boxed(&self, config: &Value) -> anyhow::Result<()>;
}

impl<T: ActionExecutor> ActionExecutorDyn for T {
    fn name(&self) -> &str {
        ActionExecutor::name(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        config: &'a Value,
        context: &'a mut ExecutionContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ActionOutcome>> + Send + 'a>> {
        Box::pin(self.execute(config, context))
    }

    fn validate_config_boxed(&self, config: &Value) -> anyhow::Result<()> {
        self.validate_config(config)
    }
}

/// Owned, type-erased executor handle.
pub struct BoxActionExecutor {
    inner: Box<dyn ActionExecutorDyn + Send + Sync>,
}

impl BoxActionExecutor {
    pub fn new<T: ActionExecutor + 'static>(executor: T) -> Self {
        Self {
            inner: Box::new(executor),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn execute(
        &self,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> anyhow::Result<ActionOutcome> {
        self.inner.execute_boxed(config, context).await
    }

    pub fn validate_config(&self, config: &Value) -> anyhow::Result<()> {
        self.inner.validate_config_boxed(config)
    }
}

impl std::fmt::Debug for BoxActionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxActionExecutor")
            .field("name", &self.inner.name())
            .finish()
    }
}
