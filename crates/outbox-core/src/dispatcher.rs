//! Dispatcher / concurrency core (§4.6): bounded work pool, in-flight
//! dedup, and backpressure against a slow downstream.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Tracks which event ids currently have a `process_event` task running (or
/// queued for a permit), and bounds how many may be claimed at once.
///
/// The in-flight set doubles as the backpressure gate (§4.6): `maxQueuedEvents`
/// bounds the set's size, `maxEventConcurrency` bounds the semaphore, and
/// since queued-but-not-yet-running tasks still hold a claim, the former is
/// expected to be >= the latter.
pub struct Dispatcher {
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
    max_queued_events: usize,
}

impl Dispatcher {
    pub fn new(max_event_concurrency: usize, max_queued_events: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_event_concurrency.max(1))),
            in_flight: Mutex::new(HashSet::new()),
            max_queued_events,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in_flight mutex poisoned").len()
    }

    /// Whether the dispatcher has room to accept another candidate without
    /// exceeding `max_queued_events`.
    pub fn has_capacity(&self) -> bool {
        self.in_flight_count() < self.max_queued_events
    }

    /// Claims `id` for dispatch if it is not already in flight and there is
    /// capacity. Returns `false` (no-op) otherwise — the caller should skip
    /// this candidate and let a later poll pick it up.
    pub fn try_claim(&self, id: &str) -> bool {
        let mut guard = self.in_flight.lock().expect("in_flight mutex poisoned");
        if guard.len() >= self.max_queued_events {
            return false;
        }
        let claimed = guard.insert(id.to_string());
        #[cfg(feature = "metrics")]
        if claimed {
            metrics::gauge!("outbox_core.events_in_flight").set(guard.len() as f64);
        }
        claimed
    }

    /// Releases a previously claimed id. Idempotent.
    pub fn release(&self, id: &str) {
        let mut guard = self.in_flight.lock().expect("in_flight mutex poisoned");
        guard.remove(id);
        #[cfg(feature = "metrics")]
        metrics::gauge!("outbox_core.events_in_flight").set(guard.len() as f64);
    }

    /// The shared handler-concurrency permit source; tasks hold one permit
    /// for their lifetime so at most `max_event_concurrency` run at once.
    pub fn semaphore(&self) -> Arc<Semaphore> {
        self.semaphore.clone()
    }
}

/// RAII guard releasing a dispatcher claim on drop, so a panicking or
/// early-returning task never leaks its claim (§4.6: "tasks remove
/// themselves on completion, both success and exception paths"). Holds an
/// owned `Arc<Dispatcher>` rather than borrowing so it can be moved into a
/// spawned `'static` task.
pub struct ClaimGuard {
    dispatcher: Arc<Dispatcher>,
    id: String,
}

impl ClaimGuard {
    /// Attempts to claim `id`; returns `None` if already in flight or at
    /// capacity.
    pub fn try_new(dispatcher: &Arc<Dispatcher>, id: &str) -> Option<Self> {
        if dispatcher.try_claim(id) {
            Some(Self {
                dispatcher: dispatcher.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.dispatcher.release(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_dedupes_in_flight() {
        let dispatcher = Dispatcher::new(10, 10);
        assert!(dispatcher.try_claim("e1"));
        assert!(!dispatcher.try_claim("e1"), "already in flight");
        dispatcher.release("e1");
        assert!(dispatcher.try_claim("e1"), "claimable again after release");
    }

    #[test]
    fn test_capacity_backpressure() {
        let dispatcher = Dispatcher::new(10, 2);
        assert!(dispatcher.try_claim("e1"));
        assert!(dispatcher.try_claim("e2"));
        assert!(!dispatcher.try_claim("e3"), "at max_queued_events");
        dispatcher.release("e1");
        assert!(dispatcher.try_claim("e3"));
    }

    #[test]
    fn test_claim_guard_releases_on_drop() {
        let dispatcher = Arc::new(Dispatcher::new(10, 10));
        {
            let _guard = ClaimGuard::try_new(&dispatcher, "e1").expect("should claim");
            assert_eq!(dispatcher.in_flight_count(), 1);
        }
        assert_eq!(dispatcher.in_flight_count(), 0);
    }
}
