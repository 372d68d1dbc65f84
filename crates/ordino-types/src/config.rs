//! Engine configuration types for Ordino.
//!
//! `EngineSettings` represents the `[engine]` section of a deployment's
//! `config.toml` that controls retry backoff, validation limits, and
//! telemetry capacity.

use serde::{Deserialize, Serialize};

/// Tunable engine behavior.
///
/// Loaded from `config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Base delay for exponential retry backoff, in milliseconds.
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// Validation failures tolerated when a wait state's validator does not
    /// set its own `max_failures`.
    #[serde(default = "default_max_validation_failures")]
    pub default_max_validation_failures: u32,

    /// Maximum error records kept in a context's `_system.error_history`.
    #[serde(default = "default_max_error_history")]
    pub max_error_history: usize,

    /// Broadcast channel capacity for lifecycle signals.
    #[serde(default = "default_signal_capacity")]
    pub signal_capacity: usize,
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_max_validation_failures() -> u32 {
    3
}

fn default_max_error_history() -> usize {
    50
}

fn default_signal_capacity() -> usize {
    1024
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            base_retry_delay_ms: default_base_retry_delay_ms(),
            default_max_validation_failures: default_max_validation_failures(),
            max_error_history: default_max_error_history(),
            signal_capacity: default_signal_capacity(),
        }
    }
}
