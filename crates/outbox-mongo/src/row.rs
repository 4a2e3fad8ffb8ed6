//! Mapping between the `events` collection document and [`outbox_core::Event`].
//!
//! Only the fields the adapter filters or sorts on (`timestamp`,
//! `backoff_until`, `processed_at`, `locked_until`) are stored as native BSON
//! dates; `handler_results` is round-tripped as an opaque nested document
//! since nothing ever queries into it.

use bson::{Bson, DateTime as BsonDateTime};
use outbox_core::{CandidateEvent, Event};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct EventDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub timestamp: BsonDateTime,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Bson,
    pub correlation_id: String,
    #[serde(default)]
    pub handler_results: Bson,
    pub errors: i32,
    #[serde(default)]
    pub backoff_until: Option<BsonDateTime>,
    #[serde(default)]
    pub processed_at: Option<BsonDateTime>,
    #[serde(default)]
    pub lock_token: Option<String>,
    #[serde(default)]
    pub locked_until: Option<BsonDateTime>,
}

impl EventDoc {
    /// Builds the stored document for a brand-new event (no lock fields yet).
    pub fn from_event(event: &Event) -> Result<Self, bson::ser::Error> {
        Ok(Self {
            id: event.id.clone(),
            timestamp: BsonDateTime::from_chrono(event.timestamp),
            event_type: event.event_type.clone(),
            data: bson::to_bson(&event.data)?,
            correlation_id: event.correlation_id.clone(),
            handler_results: bson::to_bson(&event.handler_results)?,
            errors: event.errors as i32,
            backoff_until: event.backoff_until.map(BsonDateTime::from_chrono),
            processed_at: event.processed_at.map(BsonDateTime::from_chrono),
            lock_token: None,
            locked_until: None,
        })
    }

    pub fn into_event(self) -> Result<Event, bson::de::Error> {
        Ok(Event {
            id: self.id,
            timestamp: self.timestamp.to_chrono(),
            event_type: self.event_type,
            data: bson::from_bson(self.data)?,
            correlation_id: self.correlation_id,
            handler_results: bson::from_bson(self.handler_results)?,
            errors: self.errors.max(0) as u32,
            backoff_until: self.backoff_until.map(|d| d.to_chrono()),
            processed_at: self.processed_at.map(|d| d.to_chrono()),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CandidateDoc {
    #[serde(rename = "_id")]
    pub id: String,
    pub errors: i32,
}

impl From<CandidateDoc> for CandidateEvent {
    fn from(doc: CandidateDoc) -> Self {
        CandidateEvent {
            id: doc.id,
            errors: doc.errors.max(0) as u32,
        }
    }
}
