//! `outbox-core` storage adapter contract (§4.1) backed by a `sqlx::PgPool`.
//!
//! The lock-skip read is `SELECT ... FOR UPDATE SKIP LOCKED`, the relational
//! equivalent of the document-store atomic find-and-update (§3.1).

use crate::row::{CandidateRow, EventRow};
use async_trait::async_trait;
use outbox_core::{BoxError, CandidateEvent, Event, ReadSide, TransactionalWriteSide, WriteTransaction};
use sqlx::{PgPool, Postgres, Transaction};
use tokio_util::sync::CancellationToken;

/// Candidates beyond this many are left for the next poll tick rather than
/// loaded all at once (§4.1: "bounded by an adapter-configured batch size").
const DEFAULT_BATCH_SIZE: i64 = 200;

#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    batch_size: i64,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }
}

#[async_trait]
impl ReadSide for PostgresStorage {
    async fn get_events_to_process(
        &self,
        max_errors: u32,
        _cancel: &CancellationToken,
    ) -> Result<Vec<CandidateEvent>, BoxError> {
        let rows: Vec<CandidateRow> = sqlx::query_as(
            r#"
            SELECT id, errors
            FROM events
            WHERE processed_at IS NULL
              AND (backoff_until IS NULL OR backoff_until < NOW())
              AND errors < $1
            ORDER BY "timestamp" ASC
            LIMIT $2
            "#,
        )
        .bind(max_errors as i32)
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(box_err)?;

        Ok(rows.into_iter().map(CandidateEvent::from).collect())
    }
}

#[async_trait]
impl TransactionalWriteSide for PostgresStorage {
    async fn begin(&self) -> Result<Box<dyn WriteTransaction>, BoxError> {
        let tx = self.pool.begin().await.map_err(box_err)?;
        Ok(Box::new(PgTransaction(tx)))
    }
}

pub struct PgTransaction(Transaction<'static, Postgres>);

#[async_trait]
impl WriteTransaction for PgTransaction {
    async fn get_event_by_id_for_update_skip_locked(
        &mut self,
        id: &str,
        max_errors: u32,
        _cancel: &CancellationToken,
    ) -> Result<Option<Event>, BoxError> {
        let row: Option<EventRow> = sqlx::query_as(
            r#"
            SELECT id, "timestamp", type, data, correlation_id, handler_results, errors, backoff_until, processed_at
            FROM events
            WHERE id = $1
              AND processed_at IS NULL
              AND (backoff_until IS NULL OR backoff_until < NOW())
              AND errors < $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(id)
        .bind(max_errors as i32)
        .fetch_optional(&mut *self.0)
        .await
        .map_err(box_err)?;

        match row {
            Some(row) => Ok(Some(row.into_event().map_err(box_err)?)),
            None => Ok(None),
        }
    }

    async fn update_event(&mut self, event: &Event) -> Result<(), BoxError> {
        let handler_results = serde_json::to_value(&event.handler_results).map_err(box_err)?;

        sqlx::query(
            r#"
            UPDATE events
            SET handler_results = $2,
                errors = $3,
                backoff_until = $4,
                processed_at = $5
            WHERE id = $1
            "#,
        )
        .bind(&event.id)
        .bind(handler_results)
        .bind(event.errors as i32)
        .bind(event.backoff_until)
        .bind(event.processed_at)
        .execute(&mut *self.0)
        .await
        .map_err(box_err)?;

        Ok(())
    }

    async fn create_event(&mut self, event: &Event) -> Result<(), BoxError> {
        let handler_results = serde_json::to_value(&event.handler_results).map_err(box_err)?;

        sqlx::query(
            r#"
            INSERT INTO events (id, "timestamp", type, data, correlation_id, handler_results, errors, backoff_until, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&event.id)
        .bind(event.timestamp)
        .bind(&event.event_type)
        .bind(&event.data)
        .bind(&event.correlation_id)
        .bind(handler_results)
        .bind(event.errors as i32)
        .bind(event.backoff_until)
        .bind(event.processed_at)
        .execute(&mut *self.0)
        .await
        .map_err(box_err)?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        self.0.commit().await.map_err(box_err)
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        self.0.rollback().await.map_err(box_err)
    }
}

fn box_err<E>(err: E) -> BoxError
where
    E: std::error::Error + Send + Sync + 'static,
{
    Box::new(err)
}

/// Checks database connectivity the way `shared::db::check_health` does,
/// scoped to this adapter's pool.
pub async fn check_health(pool: &PgPool) -> Result<(), BoxError> {
    sqlx::query("SELECT 1").execute(pool).await.map_err(box_err)?;
    Ok(())
}

/// Convenience for a max-errors hook that wants to insert a follow-up event
/// (§4.5 step 9) without reaching back into sqlx directly.
pub async fn insert_follow_up(
    tx: &mut dyn WriteTransaction,
    id: impl Into<String>,
    event_type: impl Into<String>,
    data: serde_json::Value,
    correlation_id: impl Into<String>,
) -> Result<(), BoxError> {
    let event = Event::new(id, event_type, data, correlation_id);
    tx.create_event(&event).await
}
