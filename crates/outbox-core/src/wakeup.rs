//! Wakeup emitter contract (§4.6): an adapter-provided pub/sub signal that
//! lets a producer nudge the poll loop instead of waiting for the next timer
//! tick. Purely advisory — a wakeup that is never fired, or an emitter that
//! is never wired up, must not affect correctness, only latency.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;

/// Fired whenever a producer wants the processor to check for new work
/// sooner than the next poll tick. The core subscribes once at start and
/// unsubscribes at stop; it never assumes delivery is reliable.
#[async_trait]
pub trait WakeupEmitter: Send + Sync {
    /// Register interest. The core calls this once, at `start()`.
    async fn on_wakeup(&self, notify: Arc<Notify>);

    /// Unregister interest. The core calls this once, at `stop()`.
    async fn off_wakeup(&self, notify: &Arc<Notify>);

    /// Whether this emitter never fires. The poller uses this to choose
    /// pure timer-only polling instead of paying for the hybrid
    /// throttle/fallback machinery when no signal will ever arrive.
    fn is_noop(&self) -> bool {
        false
    }
}

/// An emitter that never fires. The default when no adapter wakeup channel
/// is configured — the processor falls back to pure timer polling (§4.6).
#[derive(Debug, Default)]
pub struct NoopWakeupEmitter;

#[async_trait]
impl WakeupEmitter for NoopWakeupEmitter {
    async fn on_wakeup(&self, _notify: Arc<Notify>) {}
    async fn off_wakeup(&self, _notify: &Arc<Notify>) {}
    fn is_noop(&self) -> bool {
        true
    }
}
