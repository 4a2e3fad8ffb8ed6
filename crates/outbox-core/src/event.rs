//! The outbox event and its per-handler bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single recorded failure against a handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerErrorRecord {
    pub error: String,
    pub at: DateTime<Utc>,
}

impl HandlerErrorRecord {
    pub fn new(error: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            error: error.into(),
            at,
        }
    }
}

/// Per-handler outcome tracking for one event (§3, invariant 3).
///
/// `processed_at` and `unprocessable_at` are mutually exclusive terminal markers;
/// both unset means the handler is still retry-eligible. `errors` is append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HandlerResult {
    pub processed_at: Option<DateTime<Utc>>,
    pub unprocessable_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors: Vec<HandlerErrorRecord>,
}

impl HandlerResult {
    /// A handler is no longer retried once it has succeeded or been poisoned.
    pub fn is_terminal(&self) -> bool {
        self.processed_at.is_some() || self.unprocessable_at.is_some()
    }
}

/// The persistent outbox event (§3 data model).
///
/// The core reads, mutates, and writes these; it never deletes one. Only
/// `handler_results`, `errors`, `backoff_until`, and `processed_at` are ever
/// mutated after creation — `id`, `timestamp`, `type`, `data`, `correlation_id`
/// are set once by the producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub correlation_id: String,
    #[serde(default)]
    pub handler_results: HashMap<String, HandlerResult>,
    #[serde(default)]
    pub errors: u32,
    #[serde(default)]
    pub backoff_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Construct a brand-new event as a producer would, prior to any processing.
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        data: serde_json::Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            data,
            correlation_id: correlation_id.into(),
            handler_results: HashMap::new(),
            errors: 0,
            backoff_until: None,
            processed_at: None,
        }
    }

    /// Invariant 1: once `processed_at` is set the event is terminal.
    pub fn is_terminal(&self) -> bool {
        self.processed_at.is_some()
    }

    /// Whether this event is currently hidden from polling by backoff.
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        matches!(self.backoff_until, Some(until) if until > now)
    }

    pub fn handler_result(&self, handler_name: &str) -> HandlerResult {
        self.handler_results.get(handler_name).cloned().unwrap_or_default()
    }
}
