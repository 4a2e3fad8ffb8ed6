//! Cancellable sleep helper, for adapter and demo-binary code that wants the
//! same "sleep for N, unless cancelled" shape `outbox_core` uses internally.
//!
//! `outbox-core` keeps its own copy of this (`outbox_core::clock`) rather than
//! depending on this crate, so the engine stays free of `shared`'s sqlx
//! dependency; this is the version for everything built on top of it.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Sleep for `duration`, returning early (with `false`) if `cancel` fires first.
/// Returns `true` if the sleep ran to completion.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
