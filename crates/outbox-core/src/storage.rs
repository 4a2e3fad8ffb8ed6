//! Storage adapter contract (§4.1, §6). The core is polymorphic over this
//! capability set — `outbox-postgres` and `outbox-mongo` are the two expected
//! reference implementations, but any adapter satisfying these traits works.

use crate::error::BoxError;
use crate::event::Event;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// The minimal projection of an event returned by a poll: just enough to
/// dedupe in-flight work and cheaply gate on `max_errors` (§4.5 step 1)
/// before paying for a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEvent {
    pub id: String,
    pub errors: u32,
}

/// Read-side of the storage contract: discovers candidate events without
/// taking locks (§4.1).
#[async_trait]
pub trait ReadSide: Send + Sync {
    /// Events satisfying `processed_at unset ∧ (backoff_until unset ∨ backoff_until
    /// < now) ∧ errors < max_errors`, ordered by `timestamp` ascending, bounded
    /// by an adapter-configured batch size.
    ///
    /// May return events another worker is currently processing; the
    /// per-event transaction (`get_event_by_id_for_update_skip_locked`) is
    /// responsible for rejecting those.
    async fn get_events_to_process(
        &self,
        max_errors: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<CandidateEvent>, BoxError>;
}

/// An open write transaction (§4.1). Consumes `self` on `commit`/`rollback`
/// the way `sqlx::Transaction` does, so a transaction cannot be used after
/// either is called.
#[async_trait]
pub trait WriteTransaction: Send {
    /// Acquires a row-level exclusive lock other workers must skip rather
    /// than block on, then re-checks the read-side predicate. Returns `None`
    /// if the event no longer qualifies (already locked, already terminal,
    /// or now backing off) — this closes the TOCTOU window between polling
    /// and locking.
    async fn get_event_by_id_for_update_skip_locked(
        &mut self,
        id: &str,
        max_errors: u32,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, BoxError>;

    /// Overwrites the mutable fields of an existing event
    /// (`handler_results`, `errors`, `backoff_until`, `processed_at`).
    async fn update_event(&mut self, event: &Event) -> Result<(), BoxError>;

    /// Inserts a new event in the same transaction. Used by the max-errors
    /// hook; the event passed in must not have `processed_at`/`backoff_until`
    /// set.
    async fn create_event(&mut self, event: &Event) -> Result<(), BoxError>;

    /// Commit the transaction, consuming it.
    async fn commit(self: Box<Self>) -> Result<(), BoxError>;

    /// Roll back the transaction, consuming it.
    async fn rollback(self: Box<Self>) -> Result<(), BoxError>;
}

/// Transactional write side of the storage contract: opens the scope that
/// `WriteTransaction` operates within.
#[async_trait]
pub trait TransactionalWriteSide: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>, BoxError>;
}


/// A storage adapter exposes both halves of the contract. Most adapters will
/// implement both traits on the same handle (e.g. a connection pool) and
/// implement `Storage` as a marker, but the two capabilities are kept
/// separate so a read replica could implement only `ReadSide`.
pub trait Storage: ReadSide + TransactionalWriteSide {}

impl<T: ReadSide + TransactionalWriteSide> Storage for T {}
