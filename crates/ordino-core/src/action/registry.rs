//! Executor registry.
//!
//! Flows reference executors by name; the registry is the single lookup
//! table the engine resolves those names against. Registration happens at
//! startup, after which the registry is shared read-only across sessions.

use std::collections::HashMap;

use serde_json::Value;

use ordino_types::context::ExecutionContext;
use ordino_types::error::ExecutorError;
use ordino_types::turn::ActionOutcome;

use super::boxed::BoxActionExecutor;
use super::executor::ActionExecutor;

/// Name-indexed collection of action executors.
#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, BoxActionExecutor>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Builder-style registration, for wiring up a registry in one expression.
    pub fn with(mut self, executor: impl ActionExecutor + 'static) -> Self {
        self.register(executor);
        self
    }

    /// Register an executor under its own name. Re-registering a name
    /// replaces the previous executor.
    pub fn register(&mut self, executor: impl ActionExecutor + 'static) {
        let boxed = BoxActionExecutor::new(executor);
        self.executors.insert(boxed.name().to_string(), boxed);
    }

    /// Register an already-boxed executor.
    pub fn register_boxed(&mut self, executor: BoxActionExecutor) {
        self.executors.insert(executor.name().to_string(), executor);
    }

    pub fn has(&self, name: &str) -> bool {
        self.executors.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&BoxActionExecutor> {
        self.executors.get(name)
    }

    /// Registered executor names, sorted for stable output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up an executor by name and run it.
    pub async fn execute(
        &self,
        name: &str,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> Result<ActionOutcome, ExecutorError> {
        let executor = self.get(name).ok_or_else(|| ExecutorError::NotFound {
            name: name.to_string(),
        })?;
        executor
            .execute(config, context)
            .await
            .map_err(|e| ExecutorError::Failed(e.to_string()))
    }
}
