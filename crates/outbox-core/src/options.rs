//! Processor configuration: every tunable the engine exposes, with documented
//! defaults, plus a builder for ergonomic construction.

use crate::backoff::{default_backoff_policy, BackoffPolicy};
use crate::handler::MaxErrorsHook;
use crate::wakeup::{NoopWakeupEmitter, WakeupEmitter};
use std::sync::Arc;
use std::time::Duration;

/// Tunables for a [`crate::lifecycle::Processor`] (§6).
#[derive(Clone)]
pub struct ProcessorOptions {
    /// Fallback timer period for the pure-timer and hybrid polling modes.
    pub polling_interval: Duration,
    /// Handlers stop being retried once `errors` reaches this count;
    /// `on_event_max_errors_reached` fires instead (§4.5 step 9).
    pub max_errors: u32,
    /// Maps a handler's error count to its next eligible retry instant.
    pub backoff: BackoffPolicy,
    /// Upper bound on events claimed and run concurrently.
    pub max_event_concurrency: usize,
    /// Upper bound on handlers run concurrently within one event.
    pub max_handler_concurrency: usize,
    /// Backpressure: events queued awaiting a dispatcher slot before polling
    /// pauses.
    pub max_queued_events: usize,
    /// If no wakeup has arrived within this window, the poll loop falls back
    /// to firing on its own rather than trusting a possibly-dead channel.
    pub wakeup_timeout: Duration,
    /// Minimum spacing enforced between wakeup-triggered polls (leading +
    /// trailing edge), independent of `polling_interval`.
    pub wakeup_throttle: Duration,
    /// Adapter-provided wakeup pub/sub; defaults to a no-op (pure timer
    /// polling).
    pub wakeup_emitter: Arc<dyn WakeupEmitter>,
    /// Invoked once an event's `errors` counter reaches `max_errors`, inside
    /// the same transaction that records the terminal state (§4.5 step 9).
    pub on_event_max_errors_reached: Option<Arc<dyn MaxErrorsHook>>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(5_000),
            max_errors: 5,
            backoff: default_backoff_policy(),
            max_event_concurrency: 20,
            max_handler_concurrency: 10,
            max_queued_events: 500,
            wakeup_timeout: Duration::from_millis(60_000),
            wakeup_throttle: Duration::from_millis(1_000),
            wakeup_emitter: Arc::new(NoopWakeupEmitter),
            on_event_max_errors_reached: None,
        }
    }
}

impl ProcessorOptions {
    pub fn builder() -> ProcessorOptionsBuilder {
        ProcessorOptionsBuilder::default()
    }
}

/// Builder for [`ProcessorOptions`]; every field starts at its documented
/// default and can be overridden individually.
#[derive(Clone)]
pub struct ProcessorOptionsBuilder {
    options: ProcessorOptions,
}

impl Default for ProcessorOptionsBuilder {
    fn default() -> Self {
        Self {
            options: ProcessorOptions::default(),
        }
    }
}

impl ProcessorOptionsBuilder {
    pub fn polling_interval(mut self, value: Duration) -> Self {
        self.options.polling_interval = value;
        self
    }

    pub fn max_errors(mut self, value: u32) -> Self {
        self.options.max_errors = value;
        self
    }

    pub fn backoff(mut self, value: BackoffPolicy) -> Self {
        self.options.backoff = value;
        self
    }

    pub fn max_event_concurrency(mut self, value: usize) -> Self {
        self.options.max_event_concurrency = value;
        self
    }

    pub fn max_handler_concurrency(mut self, value: usize) -> Self {
        self.options.max_handler_concurrency = value;
        self
    }

    pub fn max_queued_events(mut self, value: usize) -> Self {
        self.options.max_queued_events = value;
        self
    }

    pub fn wakeup_timeout(mut self, value: Duration) -> Self {
        self.options.wakeup_timeout = value;
        self
    }

    pub fn wakeup_throttle(mut self, value: Duration) -> Self {
        self.options.wakeup_throttle = value;
        self
    }

    pub fn wakeup_emitter(mut self, value: Arc<dyn WakeupEmitter>) -> Self {
        self.options.wakeup_emitter = value;
        self
    }

    pub fn on_event_max_errors_reached(mut self, hook: Arc<dyn MaxErrorsHook>) -> Self {
        self.options.on_event_max_errors_reached = Some(hook);
        self
    }

    pub fn build(self) -> ProcessorOptions {
        self.options
    }
}
