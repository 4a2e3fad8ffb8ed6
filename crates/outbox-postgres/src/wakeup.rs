//! `LISTEN`/`NOTIFY`-backed [`WakeupEmitter`] (§4.2), the concrete adapter
//! analogue of the abstract "advisory push signal" contract.
//!
//! A dedicated `PgListener` connection, one channel, `recv()` in a loop,
//! log-and-retry on a transport error rather than tearing the whole
//! processor down.

use async_trait::async_trait;
use outbox_core::WakeupEmitter;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Producers call `NOTIFY <channel>, '<event id>'` (the payload itself is
/// unused — a signal only ever means "check again", never "check this one").
pub struct PgNotifyWakeupEmitter {
    pool: PgPool,
    channel: String,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PgNotifyWakeupEmitter {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl WakeupEmitter for PgNotifyWakeupEmitter {
    async fn on_wakeup(&self, notify: Arc<Notify>) {
        let pool = self.pool.clone();
        let channel = self.channel.clone();

        let handle = tokio::spawn(async move {
            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::error!(error = %err, "failed to open postgres listener, wakeup signal disabled");
                    return;
                }
            };
            if let Err(err) = listener.listen(&channel).await {
                tracing::error!(error = %err, channel = %channel, "failed to LISTEN on channel, wakeup signal disabled");
                return;
            }
            tracing::info!(channel = %channel, "listening for wakeup notifications");

            loop {
                match listener.recv().await {
                    Ok(_notification) => notify.notify_one(),
                    Err(err) => {
                        tracing::error!(error = %err, "error receiving postgres notification, retrying");
                        tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                    }
                }
            }
        });

        *self.task.lock().await = Some(handle);
    }

    async fn off_wakeup(&self, _notify: &Arc<Notify>) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }
}
