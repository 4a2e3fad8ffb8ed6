//! Mapping between the `events` table (§3.1) and [`outbox_core::Event`].

use chrono::{DateTime, Utc};
use outbox_core::{CandidateEvent, Event};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
pub struct EventRow {
    pub id: String,
    #[sqlx(rename = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[sqlx(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub correlation_id: String,
    pub handler_results: serde_json::Value,
    pub errors: i32,
    pub backoff_until: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl EventRow {
    pub fn into_event(self) -> Result<Event, serde_json::Error> {
        Ok(Event {
            id: self.id,
            timestamp: self.timestamp,
            event_type: self.event_type,
            data: self.data,
            correlation_id: self.correlation_id,
            handler_results: serde_json::from_value(self.handler_results)?,
            errors: self.errors.max(0) as u32,
            backoff_until: self.backoff_until,
            processed_at: self.processed_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct CandidateRow {
    pub id: String,
    pub errors: i32,
}

impl From<CandidateRow> for CandidateEvent {
    fn from(row: CandidateRow) -> Self {
        CandidateEvent {
            id: row.id,
            errors: row.errors.max(0) as u32,
        }
    }
}
