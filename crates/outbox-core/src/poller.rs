//! Polling + wakeup loop (§4.7): the producer side of the pipeline. Reads
//! candidates from [`ReadSide`], claims them against the [`Dispatcher`], and
//! spawns a bounded [`crate::state_machine::process_event`] task for each.

use crate::clock::{sleep_cancellable, sleep_until_cancellable};
use crate::dispatcher::{ClaimGuard, Dispatcher};
use crate::handler::HandlerMap;
use crate::options::ProcessorOptions;
use crate::storage::{ReadSide, TransactionalWriteSide};
use crate::throttle::{Throttle, ThrottleDecision};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Owns the poll/dispatch pipeline for one running [`crate::lifecycle::Processor`].
pub struct Poller {
    read_side: Arc<dyn ReadSide>,
    write_side: Arc<dyn TransactionalWriteSide>,
    handlers: Arc<HandlerMap>,
    options: Arc<ProcessorOptions>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
    is_polling: AtomicBool,
    last_wakeup: Mutex<Option<Instant>>,
    throttle: Throttle,
    /// Shared with the wakeup emitter in hybrid mode (and the only signal
    /// source in timer-only mode): a completed event's `backoff_until`
    /// schedules a notify here to shorten its own retry latency (§4.5 step 10).
    self_wakeup: Arc<Notify>,
}

impl Poller {
    pub fn new(
        read_side: Arc<dyn ReadSide>,
        write_side: Arc<dyn TransactionalWriteSide>,
        handlers: Arc<HandlerMap>,
        options: Arc<ProcessorOptions>,
        dispatcher: Arc<Dispatcher>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let throttle_window = options.wakeup_throttle;
        Arc::new(Self {
            read_side,
            write_side,
            handlers,
            options,
            dispatcher,
            cancel,
            is_polling: AtomicBool::new(false),
            last_wakeup: Mutex::new(None),
            throttle: Throttle::new(throttle_window),
            self_wakeup: Arc::new(Notify::new()),
        })
    }

    /// Runs until the cancellation token fires. Picks timer-only or hybrid
    /// mode based on whether a real wakeup emitter is configured (§4.7).
    pub async fn run(self: Arc<Self>) {
        if self.options.wakeup_emitter.is_noop() {
            self.run_timer_only().await;
        } else {
            self.run_hybrid().await;
        }
    }

    async fn run_timer_only(self: Arc<Self>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.options.polling_interval) => {}
                _ = self.self_wakeup.notified() => {}
            }
            if self.cancel.is_cancelled() {
                return;
            }
            self.poll_once().await;
        }
    }

    async fn run_hybrid(self: Arc<Self>) {
        // The same notify doubles as the self-wakeup target (§4.5 step 10):
        // an event's own backoff expiry looks exactly like an external push.
        let notify = self.self_wakeup.clone();
        self.options.wakeup_emitter.on_wakeup(notify.clone()).await;

        let fallback = self.clone();
        let fallback_task = tokio::spawn(async move { fallback.run_fallback_timer().await });

        loop {
            // `biased` so a cancellation that raced a pending notify always
            // wins the select: a signal received once `stopping` has begun
            // is ignored rather than triggering one more poll (§9 open
            // question 3, "detach on entry to stopping").
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = notify.notified() => {
                    *self.last_wakeup.lock().expect("last_wakeup mutex poisoned") = Some(Instant::now());
                    Self::run_throttled_poll(&self).await;
                }
            }
        }

        self.options.wakeup_emitter.off_wakeup(&notify).await;
        fallback_task.abort();
    }

    async fn run_fallback_timer(self: Arc<Self>) {
        loop {
            if !sleep_cancellable(self.options.polling_interval, &self.cancel).await {
                return;
            }
            let silent = {
                let guard = self.last_wakeup.lock().expect("last_wakeup mutex poisoned");
                match *guard {
                    None => true,
                    Some(last) => last.elapsed() >= self.options.wakeup_timeout,
                }
            };
            if silent {
                Self::run_throttled_poll(&self).await;
            }
        }
    }

    /// The single entry point for both the wakeup listener and the fallback
    /// timer, so they cannot race into concurrent polls (§4.7).
    async fn run_throttled_poll(self_arc: &Arc<Self>) {
        match self_arc.throttle.fire() {
            ThrottleDecision::RunNow => self_arc.poll_once().await,
            ThrottleDecision::Absorbed => {
                let this = self_arc.clone();
                let window = this.throttle.window();
                tokio::spawn(async move {
                    if !sleep_cancellable(window, &this.cancel).await {
                        return;
                    }
                    if this.throttle.take_trailing_due() {
                        this.poll_once().await;
                    }
                });
            }
        }
    }

    async fn poll_once(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.is_polling.swap(true, Ordering::SeqCst) {
            return;
        }

        self.poll_once_inner().await;

        self.is_polling.store(false, Ordering::SeqCst);
    }

    #[tracing::instrument(skip(self))]
    async fn poll_once_inner(&self) {
        if !self.dispatcher.has_capacity() {
            tracing::debug!("dispatcher at capacity, skipping poll tick");
            return;
        }

        let candidates = match self
            .read_side
            .get_events_to_process(self.options.max_errors, &self.cancel)
            .await
        {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::error!(error = %err, "failed to read candidate events, will retry next tick");
                return;
            }
        };

        for candidate in candidates {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(guard) = ClaimGuard::try_new(&self.dispatcher, &candidate.id) else {
                continue;
            };

            let write_side = self.write_side.clone();
            let handlers = self.handlers.clone();
            let options = self.options.clone();
            let semaphore = self.dispatcher.semaphore();
            let cancel = self.cancel.clone();
            let self_wakeup = self.self_wakeup.clone();

            tokio::spawn(async move {
                let permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let outcome = crate::state_machine::process_event(
                    &candidate,
                    write_side.as_ref(),
                    &handlers,
                    &options,
                    cancel.clone(),
                )
                .await;
                drop(permit);
                drop(guard);

                match outcome {
                    Ok(crate::state_machine::Outcome::BackingOff(backoff_until)) => {
                        tracing::debug!(event_id = %candidate.id, %backoff_until, "event backing off, scheduling self-wakeup");
                        tokio::spawn(async move {
                            if sleep_until_cancellable(backoff_until, &cancel).await {
                                self_wakeup.notify_one();
                            }
                        });
                    }
                    Ok(outcome) => {
                        tracing::debug!(event_id = %candidate.id, outcome = ?outcome, "event processed");
                    }
                    Err(err) => {
                        tracing::error!(event_id = %candidate.id, error = %err, "process_event failed");
                    }
                }
            });
        }
    }
}
