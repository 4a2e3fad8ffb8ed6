//! Integration tests against a real Postgres instance.
//!
//! Ignored by default since they need `DATABASE_URL` pointed at a database
//! with the `events` table migrated (see `migrations/`). Run with
//! `cargo test -- --ignored` once a database is available.

use outbox_core::{CandidateEvent, Event, ReadSide, TransactionalWriteSide};
use outbox_postgres::PostgresStorage;
use serde_json::json;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

async fn setup() -> PgPool {
    let database_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for outbox-postgres integration tests");
    let pool = PgPool::connect(&database_url)
        .await
        .expect("failed to connect to DATABASE_URL");
    sqlx::query("DELETE FROM events WHERE id LIKE 'test_%'")
        .execute(&pool)
        .await
        .expect("failed to clean up prior test rows");
    pool
}

#[tokio::test]
#[ignore]
async fn test_get_events_to_process_skips_processed_and_backed_off() {
    let pool = setup().await;
    let storage = PostgresStorage::new(pool.clone());
    let cancel = CancellationToken::new();

    let mut ready = Event::new("test_ready", "X", json!({}), "corr-1");
    let mut done = Event::new("test_done", "X", json!({}), "corr-1");
    done.processed_at = Some(chrono::Utc::now());
    let mut backing_off = Event::new("test_backing_off", "X", json!({}), "corr-1");
    backing_off.backoff_until = Some(chrono::Utc::now() + chrono::Duration::hours(1));

    for event in [&mut ready, &mut done, &mut backing_off] {
        let mut tx = storage.begin().await.expect("begin");
        tx.create_event(event).await.expect("create_event");
        tx.commit().await.expect("commit");
    }

    let candidates = storage
        .get_events_to_process(5, &cancel)
        .await
        .expect("get_events_to_process");

    let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
    assert!(ids.contains(&"test_ready"));
    assert!(!ids.contains(&"test_done"));
    assert!(!ids.contains(&"test_backing_off"));
}

#[tokio::test]
#[ignore]
async fn test_get_event_by_id_for_update_skip_locked_excludes_max_errors() {
    let pool = setup().await;
    let storage = PostgresStorage::new(pool.clone());
    let cancel = CancellationToken::new();

    let mut maxed_out = Event::new("test_maxed_out", "X", json!({}), "corr-1");
    maxed_out.errors = 5;
    let mut tx = storage.begin().await.expect("begin");
    tx.create_event(&maxed_out).await.expect("create_event");
    tx.commit().await.expect("commit");

    let mut tx = storage.begin().await.expect("begin");
    let fetched = tx
        .get_event_by_id_for_update_skip_locked("test_maxed_out", 5, &cancel)
        .await
        .expect("get_event_by_id_for_update_skip_locked");
    assert!(fetched.is_none());
    tx.rollback().await.expect("rollback");
}

#[tokio::test]
#[ignore]
async fn test_update_event_persists_handler_results_and_processed_at() {
    let pool = setup().await;
    let storage = PostgresStorage::new(pool.clone());
    let cancel = CancellationToken::new();

    let event = Event::new("test_update", "X", json!({}), "corr-1");
    let mut tx = storage.begin().await.expect("begin");
    tx.create_event(&event).await.expect("create_event");
    tx.commit().await.expect("commit");

    let mut tx = storage.begin().await.expect("begin");
    let mut fetched = tx
        .get_event_by_id_for_update_skip_locked("test_update", 5, &cancel)
        .await
        .expect("get_event_by_id_for_update_skip_locked")
        .expect("row exists");
    fetched.processed_at = Some(chrono::Utc::now());
    tx.update_event(&fetched).await.expect("update_event");
    tx.commit().await.expect("commit");

    let candidates = storage
        .get_events_to_process(5, &cancel)
        .await
        .expect("get_events_to_process");
    assert!(!candidates.iter().any(|c: &CandidateEvent| c.id == "test_update"));
}
