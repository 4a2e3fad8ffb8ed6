//! Cancellable sleep (§5: "sleep with cancel"), used by the poll timer and
//! the throttle's trailing-edge wait. Kept local to this crate rather than
//! pulled from `shared` so the engine stays free of that crate's adapter
//! dependencies.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleeps for `duration` unless `cancel` fires first. Returns `true` if the
/// sleep ran to completion, `false` if cancelled early.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Sleeps until the given instant (used to schedule a self-wakeup at a
/// freshly-written `backoff_until`, §4.5 step 10). An instant already in the
/// past sleeps for zero duration.
pub async fn sleep_until_cancellable(when: DateTime<Utc>, cancel: &CancellationToken) -> bool {
    let duration = (when - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    sleep_cancellable(duration, cancel).await
}
