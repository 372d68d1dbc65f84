use thiserror::Error;

/// Errors at the executor contract boundary.
///
/// Concrete executors run under `anyhow`; this enum is the typed surface
/// the registry and engine use for dispatch failures and config checks.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("no executor registered under '{name}'")]
    NotFound { name: String },

    #[error("invalid executor config: {0}")]
    InvalidConfig(String),

    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("executor failed: {0}")]
    Failed(String),
}
