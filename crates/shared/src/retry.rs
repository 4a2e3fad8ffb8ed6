//! Generic retry-with-backoff helper.
//!
//! `outbox-core` has its own per-event backoff policy (`outbox_core::backoff`); this
//! helper is for the surrounding plumbing instead — adapter connection setup, the
//! demo binary's startup sequence — anywhere a transient failure should be
//! retried a fixed number of times rather than fed through the event state machine.

use std::future::Future;
use std::time::Duration;

/// Exponential retry policy: `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default policy: 3 attempts with delays of 1s, 2s, 4s
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Calculate delay for a given attempt (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(multiplier);
        std::cmp::min(delay, self.max_delay)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Run `operation` until it succeeds or the policy is exhausted, sleeping between
/// attempts according to [`RetryPolicy::delay_for_attempt`].
pub async fn execute_with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if policy.should_retry(attempt) {
                    let delay = policy.delay_for_attempt(attempt);
                    tracing::warn!(attempt, ?delay, "Operation failed, retrying");
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}
