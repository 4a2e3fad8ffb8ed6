//! PostgreSQL storage adapter for `outbox-core`.
//!
//! Implements the adapter contract (`ReadSide`/`TransactionalWriteSide`/
//! `WriteTransaction`) on top of `sqlx::PgPool`, using `SELECT ... FOR UPDATE
//! SKIP LOCKED` for the per-event lock-skip read described in §3.1 and §4.5.

mod row;
mod storage;
mod wakeup;

pub use row::{CandidateRow, EventRow};
pub use storage::{check_health, insert_follow_up, PgTransaction, PostgresStorage};
pub use wakeup::PgNotifyWakeupEmitter;
