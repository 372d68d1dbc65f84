//! Action executor contract.

use serde_json::Value;

use ordino_types::context::ExecutionContext;
use ordino_types::turn::ActionOutcome;

/// A named capability that flow actions invoke.
///
/// Executors are where side effects live. The engine stays generic: it
/// interpolates the action config, calls the executor by name, and applies
/// the declared error policy to whatever comes back. An `Err` return means
/// the executor itself broke (transport failure, bad config shape); a
/// domain-level rejection is a normal return with
/// [`ActionOutcome::success`] set to `false`. The engine treats both as an
/// action failure.
pub trait ActionExecutor: Send + Sync {
    /// Registry name that actions reference this executor by.
    fn name(&self) -> &str;

    /// Run the action against an already-interpolated config.
    fn execute(
        &self,
        config: &Value,
        context: &mut ExecutionContext,
    ) -> impl std::future::Future<Output = anyhow::Result<ActionOutcome>> + Send;

    /// Load-time config check, called during flow validation.
    ///
    /// The default accepts anything. Executors with a required config shape
    /// should override this so broken flows fail at load, not mid-turn.
    fn validate_config(&self, _config: &Value) -> anyhow::Result<()> {
        Ok(())
    }
}
