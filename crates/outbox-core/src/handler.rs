//! Handler contract (§4.2): the user-supplied unit of work run against an
//! event for a named handler group.

use crate::error::{BoxError, HandlerError};
use crate::event::Event;
use crate::storage::WriteTransaction;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One handler within a named group. Handlers must be idempotent: the engine
/// guarantees at-least-once invocation, never exactly-once (§2, invariant 5).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, event: &Event, cancel: CancellationToken) -> Result<(), HandlerError>;
}

/// Blanket impl so a plain async closure can be registered directly,
/// without a caller needing to name a type for a one-off handler.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(&Event, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn call(&self, event: &Event, cancel: CancellationToken) -> Result<(), HandlerError> {
        self(event, cancel).await
    }
}

pub type BoxHandler = Arc<dyn Handler>;
pub type HandlerGroup = HashMap<String, BoxHandler>;

/// `event.type -> handler_name -> handler` (§4.2). A group is the set of
/// named handlers registered for one event type; an event whose type has no
/// registered group is poisoned rather than silently skipped (§4.5 step 4).
pub type HandlerMap = HashMap<String, HandlerGroup>;

/// Invoked once an event's `errors` counter reaches `max_errors`, inside the
/// same transaction that records the terminal state (§4.5 step 9, §6). The
/// event passed in is a snapshot (`Clone`) so the hook cannot retroactively
/// corrupt the persisted record; it gets the live transaction handle so it
/// can `create_event` a follow-up without a separate round trip.
#[async_trait]
pub trait MaxErrorsHook: Send + Sync {
    async fn call(
        &self,
        event: Event,
        tx: &mut dyn WriteTransaction,
        cancel: CancellationToken,
    ) -> Result<(), BoxError>;
}
