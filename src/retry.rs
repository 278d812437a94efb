//! Bounded exponential backoff for transient provider failures.
//!
//! Providers distinguish transient failures (network, timeout, rate limit)
//! from terminal ones (rejected content, authentication). Only the former are
//! retried; exhaustion surfaces the final transient error to the caller.

use std::future::Future;
use std::time::Duration;

/// Classification hook implemented by provider error types.
pub trait Transient {
    /// Whether a retry has any chance of succeeding.
    fn is_transient(&self) -> bool;
}

/// Attempt ceiling and delay schedule for [`with_backoff`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each subsequent one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from attempt ceiling and base delay in milliseconds.
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
        }
    }
}

/// Run `op`, retrying transient failures until the policy's attempt ceiling.
pub async fn with_backoff<T, E, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy
                    .base_delay
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient provider failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}
