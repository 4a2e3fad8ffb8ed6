//! Leading+trailing-edge throttle for the wakeup-triggered poll (§4.7, §9).
//!
//! Plain debounce (trailing-edge only) would add `wakeup_throttle` of latency
//! to every burst's first event. Plain leading-edge-only would miss work that
//! arrives during the throttle window. This does both: the first signal in a
//! quiet period fires immediately, and if further signals arrive before the
//! window closes, exactly one more fire happens at the window's end.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Coalesces a burst of `fire()` calls into a leading poll plus at most one
/// trailing poll. Not itself a poller — `Throttle::fire` just decides
/// whether *this* call should run `on_fire` now, later, or be absorbed.
pub struct Throttle {
    window: Duration,
    last_leading_edge: Mutex<Option<Instant>>,
    trailing_pending: AtomicBool,
}

/// What the caller should do in response to a `fire()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Outside the window (or first call ever): run now, this becomes the
    /// new leading edge.
    RunNow,
    /// Inside the window: absorbed. A trailing poll has been scheduled and
    /// will be reported exactly once via `take_trailing_due` once the window
    /// elapses.
    Absorbed,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_leading_edge: Mutex::new(None),
            trailing_pending: AtomicBool::new(false),
        }
    }

    /// Call on every signal. Leading-edge semantics: the first call after a
    /// quiet period of at least `window` returns `RunNow` immediately.
    pub fn fire(&self) -> ThrottleDecision {
        let now = Instant::now();
        let mut guard = self.last_leading_edge.lock().expect("throttle mutex poisoned");
        let due = match *guard {
            None => true,
            Some(last) => now.duration_since(last) >= self.window,
        };
        if due {
            *guard = Some(now);
            ThrottleDecision::RunNow
        } else {
            self.trailing_pending.store(true, Ordering::SeqCst);
            ThrottleDecision::Absorbed
        }
    }

    /// The caller's poll loop should sleep `window` after every `RunNow` (or
    /// after the previous trailing fire) and call this; if a signal arrived
    /// during that sleep, it returns `true` exactly once and the caller
    /// should run the trailing poll.
    pub fn take_trailing_due(&self) -> bool {
        self.trailing_pending.swap(false, Ordering::SeqCst)
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}
