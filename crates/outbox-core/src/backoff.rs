//! Backoff policy (§4.3): a pure function from error count to next retry instant.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// `backoff(error_count) -> instant`, replaceable as configuration (§4.3, §6).
pub type BackoffPolicy = Arc<dyn Fn(u32) -> DateTime<Utc> + Send + Sync>;

/// Capped exponential backoff: `min(1s * 2^errors, 60s)` from now.
pub fn default_backoff_policy() -> BackoffPolicy {
    Arc::new(|error_count: u32| Utc::now() + capped_exponential(error_count))
}

fn capped_exponential(error_count: u32) -> Duration {
    const CAP_SECS: i64 = 60;
    let secs = 1i64.checked_shl(error_count).unwrap_or(i64::MAX);
    Duration::seconds(secs.min(CAP_SECS))
}
