//! Lifecycle controller (§4.8): `stopped -> started -> stopping -> stopped`,
//! with a bounded-time drain on shutdown.

use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::handler::HandlerMap;
use crate::options::ProcessorOptions;
use crate::poller::Poller;
use crate::storage::{ReadSide, TransactionalWriteSide};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Stopped,
    Started,
    Stopping,
}

/// The consumer-facing entry point (§6): `Processor::new(...).start()` /
/// `.stop(timeout)`.
pub struct Processor {
    read_side: Arc<dyn ReadSide>,
    write_side: Arc<dyn TransactionalWriteSide>,
    handlers: Arc<HandlerMap>,
    options: Arc<ProcessorOptions>,
    state: Mutex<LifecycleState>,
    cancel: Mutex<Option<CancellationToken>>,
    dispatcher: Mutex<Option<Arc<Dispatcher>>>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl Processor {
    pub fn new(
        read_side: Arc<dyn ReadSide>,
        write_side: Arc<dyn TransactionalWriteSide>,
        handlers: HandlerMap,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            read_side,
            write_side,
            handlers: Arc::new(handlers),
            options: Arc::new(options),
            state: Mutex::new(LifecycleState::Stopped),
            cancel: Mutex::new(None),
            dispatcher: Mutex::new(None),
            poll_task: Mutex::new(None),
        }
    }

    /// Idempotent-with-warning: calling `start()` on an already-started or
    /// stopping processor logs and returns rather than erroring (§4.8).
    pub async fn start(&self) {
        {
            let mut state = self.state.lock().expect("lifecycle mutex poisoned");
            match *state {
                LifecycleState::Stopped => *state = LifecycleState::Started,
                other => {
                    tracing::warn!(state = ?other, "start() called on a processor that is not stopped, ignoring");
                    return;
                }
            }
        }

        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(
            self.options.max_event_concurrency,
            self.options.max_queued_events,
        ));
        let poller = Poller::new(
            self.read_side.clone(),
            self.write_side.clone(),
            self.handlers.clone(),
            self.options.clone(),
            dispatcher.clone(),
            cancel.clone(),
        );
        let poll_task = tokio::spawn(poller.run());

        *self.cancel.lock().expect("lifecycle mutex poisoned") = Some(cancel);
        *self.dispatcher.lock().expect("lifecycle mutex poisoned") = Some(dispatcher);
        *self.poll_task.lock().expect("lifecycle mutex poisoned") = Some(poll_task);

        tracing::info!("processor started");
    }

    /// Signals cancellation, detaches the poll loop, and waits up to
    /// `timeout` for in-flight event tasks to drain. Returns
    /// [`CoreError::ShutdownTimeout`] if the drain does not finish in time;
    /// the processor is `stopped` either way (§4.8).
    pub async fn stop(&self, timeout: Duration) -> Result<(), CoreError> {
        {
            let mut state = self.state.lock().expect("lifecycle mutex poisoned");
            match *state {
                LifecycleState::Started => *state = LifecycleState::Stopping,
                other => {
                    tracing::warn!(state = ?other, "stop() called on a processor that is not started, ignoring");
                    return Ok(());
                }
            }
        }

        if let Some(cancel) = self.cancel.lock().expect("lifecycle mutex poisoned").take() {
            cancel.cancel();
        }
        let poll_task = self.poll_task.lock().expect("lifecycle mutex poisoned").take();
        let dispatcher = self.dispatcher.lock().expect("lifecycle mutex poisoned").take();

        // Awaiting the poll task (rather than aborting it) lets its own
        // cancellation branch run to completion first, so it detaches and
        // closes the wakeup listener and cancels its fallback timer task
        // before we declare the pool drained (§4.8).
        let shutdown = async move {
            if let Some(poll_task) = poll_task {
                let _ = poll_task.await;
            }
            if let Some(dispatcher) = dispatcher {
                drain(dispatcher).await;
            }
        };
        let drained = tokio::time::timeout(timeout, shutdown).await.is_ok();

        *self.state.lock().expect("lifecycle mutex poisoned") = LifecycleState::Stopped;

        if drained {
            tracing::info!("processor stopped");
            Ok(())
        } else {
            tracing::error!(?timeout, "processor shutdown timed out waiting for in-flight events to drain");
            Err(CoreError::ShutdownTimeout(timeout))
        }
    }

    /// Default shutdown timeout, used by callers that do not care to tune
    /// it (§6: default 10s).
    pub fn default_shutdown_timeout() -> Duration {
        DEFAULT_SHUTDOWN_TIMEOUT
    }
}

async fn drain(dispatcher: Arc<Dispatcher>) {
    while dispatcher.in_flight_count() > 0 {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CandidateEvent, WriteTransaction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EmptyReadSide;

    #[async_trait]
    impl ReadSide for EmptyReadSide {
        async fn get_events_to_process(
            &self,
            _max_errors: u32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<CandidateEvent>, crate::error::BoxError> {
            Ok(vec![])
        }
    }

    struct NullTransaction;

    #[async_trait]
    impl WriteTransaction for NullTransaction {
        async fn get_event_by_id_for_update_skip_locked(
            &mut self,
            _id: &str,
            _max_errors: u32,
            _cancel: &CancellationToken,
        ) -> Result<Option<crate::event::Event>, crate::error::BoxError> {
            Ok(None)
        }

        async fn update_event(&mut self, _event: &crate::event::Event) -> Result<(), crate::error::BoxError> {
            Ok(())
        }

        async fn create_event(&mut self, _event: &crate::event::Event) -> Result<(), crate::error::BoxError> {
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), crate::error::BoxError> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), crate::error::BoxError> {
            Ok(())
        }
    }

    struct NullWriteSide;

    #[async_trait]
    impl TransactionalWriteSide for NullWriteSide {
        async fn begin(&self) -> Result<Box<dyn WriteTransaction>, crate::error::BoxError> {
            Ok(Box::new(NullTransaction))
        }
    }

    fn processor() -> Processor {
        Processor::new(
            Arc::new(EmptyReadSide),
            Arc::new(NullWriteSide),
            HandlerMap::new(),
            ProcessorOptions::builder()
                .polling_interval(Duration::from_millis(10))
                .build(),
        )
    }

    #[tokio::test]
    async fn test_start_then_stop_drains_with_no_in_flight_work() {
        let processor = processor();
        processor.start().await;
        let result = processor.stop(Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_double_start_is_idempotent_with_warning() {
        let processor = processor();
        processor.start().await;
        processor.start().await; // should warn, not panic
        let result = processor.stop(Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_a_noop() {
        let processor = processor();
        let result = processor.stop(Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stop_times_out_when_a_task_ignores_cancellation() {
        let processor = processor();
        processor.start().await;

        let dispatcher = processor
            .dispatcher
            .lock()
            .expect("lifecycle mutex poisoned")
            .clone()
            .expect("dispatcher present after start");
        let stuck = crate::dispatcher::ClaimGuard::try_new(&dispatcher, "stuck-event")
            .expect("should claim");
        let holder = Arc::new(AtomicUsize::new(0));
        let holder_clone = holder.clone();
        // Hold the claim open past the shutdown timeout to force a timeout.
        let _task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            holder_clone.fetch_add(1, Ordering::SeqCst);
            drop(stuck);
        });

        let result = processor.stop(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(CoreError::ShutdownTimeout(_))));
    }
}
