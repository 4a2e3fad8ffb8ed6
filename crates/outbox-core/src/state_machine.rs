//! The per-event transactional state machine (§4.5): the core algorithm.
//!
//! `process_event` is the only entry point the dispatcher calls. Everything
//! above the row lock (picking candidates, deduplicating in-flight ids) is
//! the dispatcher's job; everything at or below it — lock, dispatch
//! handlers, compute next state, persist — lives here.

use crate::error::{CoreError, HandlerError};
use crate::event::{Event, HandlerErrorRecord};
use crate::handler::HandlerMap;
use crate::options::ProcessorOptions;
use crate::storage::{CandidateEvent, TransactionalWriteSide, WriteTransaction};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// What happened to a candidate. The dispatcher uses `backoff_until` to
/// decide whether to schedule a self-wakeup (§4.5 step 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Gated out before or under the lock: cancelled, already at
    /// `max_errors`, already terminal, lost the lock race, or entered
    /// backoff since polling. Nothing was persisted.
    Skipped,
    /// Ran to a terminal state (success or exhausted/poisoned). No further
    /// polling will surface this event.
    Terminal,
    /// Ran to a non-terminal state; `backoff_until` is the instant after
    /// which it becomes eligible again.
    BackingOff(DateTime<Utc>),
}

#[tracing::instrument(skip(write_side, handlers, options, cancel), fields(event_id = %candidate.id))]
pub async fn process_event(
    candidate: &CandidateEvent,
    write_side: &dyn TransactionalWriteSide,
    handlers: &HandlerMap,
    options: &ProcessorOptions,
    cancel: CancellationToken,
) -> Result<Outcome, CoreError> {
    // Step 1: cheap gate.
    if cancel.is_cancelled() {
        return Ok(Outcome::Skipped);
    }
    if candidate.errors >= options.max_errors {
        tracing::warn!(
            errors = candidate.errors,
            max_errors = options.max_errors,
            "adapter returned a candidate already at max_errors"
        );
        return Ok(Outcome::Skipped);
    }

    // Step 2: open transaction.
    let mut tx = write_side.begin().await.map_err(CoreError::Storage)?;

    let attempt = run_under_lock(tx.as_mut(), candidate, handlers, options, &cancel).await;

    match attempt {
        Ok(outcome) => {
            tx.commit().await.map_err(CoreError::Storage)?;
            Ok(outcome)
        }
        Err(err) => match tx.rollback().await {
            Ok(()) => Err(err),
            Err(rollback_err) => Err(CoreError::RollbackFailed {
                original: Box::new(err),
                rollback: rollback_err,
            }),
        },
    }
}

async fn run_under_lock(
    tx: &mut dyn WriteTransaction,
    candidate: &CandidateEvent,
    handlers: &HandlerMap,
    options: &ProcessorOptions,
    cancel: &CancellationToken,
) -> Result<Outcome, CoreError> {
    // Step 3: lock-skip fetch.
    let mut event = match tx
        .get_event_by_id_for_update_skip_locked(&candidate.id, options.max_errors, cancel)
        .await
        .map_err(CoreError::Storage)?
    {
        Some(event) => event,
        None => return Ok(Outcome::Skipped),
    };

    // Step 4: re-gate under the lock.
    if event.is_terminal() || event.errors >= options.max_errors {
        return Ok(Outcome::Skipped);
    }

    let mut errored = false;
    let mut backoff_hints: Vec<DateTime<Utc>> = Vec::new();

    // Step 5: resolve handler group.
    match handlers.get(&event.event_type) {
        None => {
            tracing::warn!(
                event_type = %event.event_type,
                "no handler group registered for this event type, poisoning event"
            );
            // Open question #2: set unconditionally rather than increment;
            // the subsequent min(errors + 1, max_errors) clamp below is then
            // a no-op, which is the documented equivalent outcome.
            event.errors = options.max_errors;
            errored = true;
        }
        Some(group) => {
            // Step 6: dispatch handlers concurrently, bounded.
            dispatch_handlers(
                &mut event,
                group,
                options.max_handler_concurrency,
                cancel,
                &mut errored,
                &mut backoff_hints,
            )
            .await;

            // Step 7: terminal-sweep rule.
            if terminal_sweep(&event, group) {
                event.errors = options.max_errors;
                errored = true;
            }
        }
    }

    // Step 8: compute next state.
    let now = Utc::now();
    let outcome = if !errored {
        event.backoff_until = None;
        event.processed_at = Some(now);
        #[cfg(feature = "metrics")]
        metrics::counter!("outbox_core.events_processed").increment(1);
        Outcome::Terminal
    } else {
        event.errors = (event.errors + 1).min(options.max_errors);

        let mut next_backoff = (options.backoff)(event.errors);
        for hint in &backoff_hints {
            if *hint > next_backoff {
                next_backoff = *hint;
            }
        }

        if event.errors >= options.max_errors {
            event.backoff_until = None;
            event.processed_at = Some(now);
            #[cfg(feature = "metrics")]
            metrics::counter!("outbox_core.events_poisoned").increment(1);

            if let Some(hook) = &options.on_event_max_errors_reached {
                let snapshot = event.clone();
                hook.call(snapshot, &mut *tx, cancel.clone())
                    .await
                    .map_err(CoreError::Hook)?;
            }

            Outcome::Terminal
        } else {
            event.backoff_until = Some(next_backoff);
            #[cfg(feature = "metrics")]
            metrics::counter!("outbox_core.events_retried").increment(1);
            Outcome::BackingOff(next_backoff)
        }
    };

    // Step 9: persist.
    tx.update_event(&event).await.map_err(CoreError::Storage)?;

    Ok(outcome)
}

/// Runs every not-yet-terminal handler in `group` concurrently, bounded by
/// `max_handler_concurrency`. Mutates `event.handler_results` and `errored`
/// in place; collects BackoffHint instants into `backoff_hints`. No
/// fail-fast: every handler is awaited (§4.5 step 6).
async fn dispatch_handlers(
    event: &mut Event,
    group: &crate::handler::HandlerGroup,
    max_handler_concurrency: usize,
    cancel: &CancellationToken,
    errored: &mut bool,
    backoff_hints: &mut Vec<DateTime<Utc>>,
) {
    let semaphore = Semaphore::new(max_handler_concurrency.max(1));
    let snapshot = event.clone();

    let mut futures = Vec::with_capacity(group.len());
    for (name, handler) in group.iter() {
        if event.handler_result(name).is_terminal() {
            continue;
        }
        let semaphore = &semaphore;
        let snapshot = &snapshot;
        let cancel = cancel.clone();
        futures.push(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let result = handler.call(snapshot, cancel).await;
            (name.clone(), result)
        });
    }

    let results = futures::future::join_all(futures).await;

    let now = Utc::now();
    for (name, result) in results {
        let mut handler_result = event.handler_result(&name);
        match result {
            Ok(()) => {
                handler_result.processed_at = Some(now);
            }
            Err(HandlerError::Unprocessable(message)) => {
                handler_result.unprocessable_at = Some(now);
                handler_result
                    .errors
                    .push(HandlerErrorRecord::new(message, now));
                *errored = true;
            }
            Err(HandlerError::BackoffHint {
                message,
                backoff_until,
            }) => {
                handler_result
                    .errors
                    .push(HandlerErrorRecord::new(message, now));
                backoff_hints.push(backoff_until);
                *errored = true;
            }
            Err(HandlerError::Transient(message)) => {
                handler_result
                    .errors
                    .push(HandlerErrorRecord::new(message, now));
                *errored = true;
            }
        }
        event.handler_results.insert(name, handler_result);
    }
}

/// True once every handler in `group` that has not succeeded has been
/// poisoned: nothing further can be retried, so the event should move
/// straight to terminal failure rather than wait out another backoff
/// (§4.5 step 7). A group with no remaining (not-yet-succeeded) handlers at
/// all is not a sweep — that's plain success, not "all remaining are
/// unprocessable".
fn terminal_sweep(event: &Event, group: &crate::handler::HandlerGroup) -> bool {
    let remaining: Vec<&String> = group
        .keys()
        .filter(|name| event.handler_result(name).processed_at.is_none())
        .collect();
    !remaining.is_empty()
        && remaining
            .iter()
            .all(|name| event.handler_result(name).unprocessable_at.is_some())
}


/// Exercises `process_event` itself end to end against mocked storage, rather
/// than only its inner helpers — the dispatcher never calls anything else, so
/// this is the only place the full §4.5 sequence (gate, lock, dispatch,
/// sweep, persist, hook, commit/rollback) runs as one unit in a test.
#[cfg(test)]
mod process_event_tests {
    use super::*;
    use crate::error::BoxError;
    use crate::handler::{Handler, HandlerGroup, HandlerMap, MaxErrorsHook};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    mock! {
        pub Transaction {}

        #[async_trait]
        impl WriteTransaction for Transaction {
            async fn get_event_by_id_for_update_skip_locked(
                &mut self,
                id: &str,
                max_errors: u32,
                cancel: &CancellationToken,
            ) -> Result<Option<Event>, BoxError>;
            async fn update_event(&mut self, event: &Event) -> Result<(), BoxError>;
            async fn create_event(&mut self, event: &Event) -> Result<(), BoxError>;
            async fn commit(self: Box<Self>) -> Result<(), BoxError>;
            async fn rollback(self: Box<Self>) -> Result<(), BoxError>;
        }
    }

    mock! {
        pub WriteSide {}

        #[async_trait]
        impl TransactionalWriteSide for WriteSide {
            async fn begin(&self) -> Result<Box<dyn WriteTransaction>, BoxError>;
        }
    }

    struct AlwaysOk;

    #[async_trait]
    impl Handler for AlwaysOk {
        async fn call(&self, _event: &Event, _cancel: CancellationToken) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    struct AlwaysTransient;

    #[async_trait]
    impl Handler for AlwaysTransient {
        async fn call(&self, _event: &Event, _cancel: CancellationToken) -> Result<(), HandlerError> {
            Err(HandlerError::transient("nope"))
        }
    }

    struct BackoffHintHandler(DateTime<Utc>);

    #[async_trait]
    impl Handler for BackoffHintHandler {
        async fn call(&self, _event: &Event, _cancel: CancellationToken) -> Result<(), HandlerError> {
            Err(HandlerError::backoff_hint("slow down", self.0))
        }
    }

    /// Records how many times the hook fired and, optionally, inserts a
    /// follow-up event the way SPEC_FULL §4.5 step 9 describes.
    struct RecordingHook {
        calls: Arc<AtomicUsize>,
        insert_follow_up: bool,
    }

    #[async_trait]
    impl MaxErrorsHook for RecordingHook {
        async fn call(&self, event: Event, tx: &mut dyn WriteTransaction, _cancel: CancellationToken) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.insert_follow_up {
                let follow_up = Event::new(format!("{}-dead-letter", event.id), "dead-letter", json!({}), event.correlation_id);
                tx.create_event(&follow_up).await?;
            }
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl MaxErrorsHook for FailingHook {
        async fn call(&self, _event: Event, _tx: &mut dyn WriteTransaction, _cancel: CancellationToken) -> Result<(), BoxError> {
            Err("hook blew up".into())
        }
    }

    fn candidate(errors: u32) -> CandidateEvent {
        CandidateEvent {
            id: "e1".to_string(),
            errors,
        }
    }

    fn write_side_with(tx: MockTransaction) -> MockWriteSide {
        let mut write_side = MockWriteSide::new();
        write_side
            .expect_begin()
            .times(1)
            .return_once(move || Ok(Box::new(tx) as Box<dyn WriteTransaction>));
        write_side
    }

    #[tokio::test]
    async fn test_all_handlers_succeed_is_terminal_and_commits() {
        let fetched = Event::new("e1", "X", json!({}), "corr-1");

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_update_event().times(1).returning(|event| {
            assert!(event.processed_at.is_some());
            assert_eq!(event.errors, 0);
            Ok(())
        });
        tx.expect_commit().times(1).returning(|| Ok(()));

        let mut group: HandlerGroup = HashMap::new();
        group.insert("a".to_string(), Arc::new(AlwaysOk));
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("X".to_string(), group);

        let outcome = process_event(
            &candidate(0),
            &write_side_with(tx),
            &handlers,
            &ProcessorOptions::builder().max_errors(3).build(),
            CancellationToken::new(),
        )
        .await
        .expect("process_event should not error");

        assert_eq!(outcome, Outcome::Terminal);
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off_without_hook() {
        let fetched = Event::new("e1", "X", json!({}), "corr-1");

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_update_event().times(1).returning(|event| {
            assert_eq!(event.errors, 1);
            assert!(event.backoff_until.is_some());
            assert!(event.processed_at.is_none());
            Ok(())
        });
        tx.expect_commit().times(1).returning(|| Ok(()));
        // No create_event expectation: a non-terminal outcome never invokes
        // the max-errors hook, so nothing should reach for a follow-up insert.

        let mut group: HandlerGroup = HashMap::new();
        group.insert("a".to_string(), Arc::new(AlwaysTransient));
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("X".to_string(), group);

        let outcome = process_event(
            &candidate(0),
            &write_side_with(tx),
            &handlers,
            &ProcessorOptions::builder().max_errors(3).build(),
            CancellationToken::new(),
        )
        .await
        .expect("process_event should not error");

        assert!(matches!(outcome, Outcome::BackingOff(_)));
    }

    #[tokio::test]
    async fn test_max_errors_reached_invokes_hook_before_committing() {
        let fetched = Event::new("e1", "X", json!({}), "corr-1");
        let hook_calls = Arc::new(AtomicUsize::new(0));

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_create_event().times(1).returning(|event| {
            assert_eq!(event.event_type, "dead-letter");
            Ok(())
        });
        tx.expect_update_event().times(1).returning(|event| {
            assert_eq!(event.errors, 1);
            assert!(event.processed_at.is_some());
            assert!(event.backoff_until.is_none());
            Ok(())
        });
        tx.expect_commit().times(1).returning(|| Ok(()));

        let mut group: HandlerGroup = HashMap::new();
        group.insert("a".to_string(), Arc::new(AlwaysTransient));
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("X".to_string(), group);

        let options = ProcessorOptions::builder()
            .max_errors(1)
            .on_event_max_errors_reached(Arc::new(RecordingHook {
                calls: hook_calls.clone(),
                insert_follow_up: true,
            }))
            .build();

        let outcome = process_event(&candidate(0), &write_side_with(tx), &handlers, &options, CancellationToken::new())
            .await
            .expect("process_event should not error");

        assert_eq!(outcome, Outcome::Terminal);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_failure_rolls_back_instead_of_committing() {
        let fetched = Event::new("e1", "X", json!({}), "corr-1");

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_rollback().times(1).returning(|| Ok(()));
        // A hook failure must short-circuit before the terminal update is
        // ever persisted or committed.
        tx.expect_update_event().times(0);
        tx.expect_commit().times(0);

        let mut group: HandlerGroup = HashMap::new();
        group.insert("a".to_string(), Arc::new(AlwaysTransient));
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("X".to_string(), group);

        let options = ProcessorOptions::builder()
            .max_errors(1)
            .on_event_max_errors_reached(Arc::new(FailingHook))
            .build();

        let result = process_event(&candidate(0), &write_side_with(tx), &handlers, &options, CancellationToken::new()).await;

        assert!(matches!(result, Err(CoreError::Hook(_))));
    }

    #[tokio::test]
    async fn test_missing_handler_group_poisons_and_invokes_hook() {
        let fetched = Event::new("e1", "unregistered-type", json!({}), "corr-1");
        let hook_calls = Arc::new(AtomicUsize::new(0));

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_update_event().times(1).returning(|event| {
            assert_eq!(event.errors, 2);
            assert!(event.processed_at.is_some());
            Ok(())
        });
        tx.expect_commit().times(1).returning(|| Ok(()));

        // Registered for a different type entirely: "unregistered-type" has no group.
        let handlers: HandlerMap = HashMap::new();

        let options = ProcessorOptions::builder()
            .max_errors(2)
            .on_event_max_errors_reached(Arc::new(RecordingHook {
                calls: hook_calls.clone(),
                insert_follow_up: false,
            }))
            .build();

        let outcome = process_event(&candidate(0), &write_side_with(tx), &handlers, &options, CancellationToken::new())
            .await
            .expect("process_event should not error");

        assert_eq!(outcome, Outcome::Terminal);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_hint_wins_over_policy_when_later() {
        let fetched = Event::new("e1", "X", json!({}), "corr-1");
        let hint = Utc::now() + chrono::Duration::hours(1);

        let mut tx = MockTransaction::new();
        tx.expect_get_event_by_id_for_update_skip_locked()
            .times(1)
            .returning(move |_id, _max_errors, _cancel| Ok(Some(fetched.clone())));
        tx.expect_update_event().times(1).returning(move |event| {
            assert_eq!(event.backoff_until, Some(hint));
            Ok(())
        });
        tx.expect_commit().times(1).returning(|| Ok(()));

        let mut group: HandlerGroup = HashMap::new();
        group.insert("a".to_string(), Arc::new(BackoffHintHandler(hint)));
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("X".to_string(), group);

        let outcome = process_event(
            &candidate(0),
            &write_side_with(tx),
            &handlers,
            &ProcessorOptions::builder().max_errors(5).build(),
            CancellationToken::new(),
        )
        .await
        .expect("process_event should not error");

        assert!(matches!(outcome, Outcome::BackingOff(until) if until == hint));
    }
}
