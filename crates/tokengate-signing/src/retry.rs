//! Retry with exponential backoff for transient failures.
//!
//! Attempt `n` (zero based) that fails transiently is followed by a sleep of
//! `base_delay * 2^n`, capped at `max_delay`. Errors that are not transient
//! are returned immediately.

use crate::errors::SigningError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Classifies errors worth another attempt.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for SigningError {
    fn is_transient(&self) -> bool {
        SigningError::is_transient(self)
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Execute `operation`, retrying transient errors per `policy`.
///
/// Returns the first success or the last error.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Transient + Display,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Transient error, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                }
                return Err(err);
            }
        }
    }
}
