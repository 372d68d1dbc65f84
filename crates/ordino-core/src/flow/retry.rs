//! Retry policy for failing actions.
//!
//! Stateless helpers the engine consults between action attempts. Only
//! the `retry` error policy triggers re-execution; `continue` and `skip`
//! record the failure and move on, `fail` aborts the remaining actions.
//! Backoff is exponential and 1-based: after attempt `n` fails, the
//! engine sleeps `base * 2^(n-1)` before attempt `n+1`.

use std::time::Duration;

use ordino_types::flow::OnErrorPolicy;

/// Backoff to apply after the given (1-based) attempt fails.
///
/// Attempt 1 waits `base`, attempt 2 waits `2 * base`, and so on.
/// The exponent is capped so large attempt counts cannot overflow.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exponent)
}

/// Whether another attempt should be made after `attempt` failed.
///
/// True only for the `retry` policy while the attempt count has not yet
/// exhausted `max_retries` extra tries (`max_retries + 1` total).
pub fn should_retry(policy: OnErrorPolicy, attempt: u32, max_retries: u32) -> bool {
    policy == OnErrorPolicy::Retry && attempt <= max_retries
}
