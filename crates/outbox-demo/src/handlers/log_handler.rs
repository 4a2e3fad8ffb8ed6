//! Example handler: logs the event and succeeds unconditionally. Shows how a
//! plain async fn satisfies `outbox_core::Handler` via its blanket impl,
//! with no struct or trait impl required for the common case.

use outbox_core::{Event, HandlerError};
use tokio_util::sync::CancellationToken;

pub async fn log_handler(event: &Event, _cancel: CancellationToken) -> Result<(), HandlerError> {
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "handling event");
    Ok(())
}
