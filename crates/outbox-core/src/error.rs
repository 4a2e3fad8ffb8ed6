//! Error taxonomy (§4.4, §7). Two distinct hierarchies:
//!
//! - [`HandlerError`] — what a user handler returns; classifies as transient,
//!   unprocessable, or transient-with-a-backoff-hint.
//! - [`CoreError`] — what the engine itself surfaces across its boundary
//!   (`stop()` timing out, a rollback that itself failed, a hook failure).
//!
//! Handler errors never escape the engine (§6): they are absorbed into
//! `handler_results`. Only `CoreError` crosses the public API.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

/// Type-erased source error from a pluggable storage adapter. Adapters are
/// expected to implement `std::error::Error`; the core does not need to know
/// their concrete error type, only that it can be boxed and displayed.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The outcome a handler reports on failure (§4.4).
#[derive(Debug)]
pub enum HandlerError {
    /// Default classification: retry with the standard backoff policy.
    Transient(String),
    /// This handler cannot make progress on this event; stop retrying it,
    /// but let other handlers for the same event continue.
    Unprocessable(String),
    /// A transient failure that additionally asserts a lower bound on the
    /// next retry instant. Reconciled with the default backoff via latest-wins
    /// (§4.5 step 8).
    BackoffHint {
        message: String,
        backoff_until: DateTime<Utc>,
    },
}

impl HandlerError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable(message.into())
    }

    pub fn backoff_hint(message: impl Into<String>, backoff_until: DateTime<Utc>) -> Self {
        Self::BackoffHint {
            message: message.into(),
            backoff_until,
        }
    }

    /// The text recorded into the handler's `errors` history.
    pub fn message(&self) -> &str {
        match self {
            HandlerError::Transient(m) => m,
            HandlerError::Unprocessable(m) => m,
            HandlerError::BackoffHint { message, .. } => message,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for HandlerError {}

/// Errors the engine itself surfaces across its public boundary (§6, §7).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A storage adapter call failed. The per-event task logs this and moves
    /// on; the poll loop recovers by waiting one more period (§7).
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    /// Rollback itself failed after an original error; both are preserved.
    #[error("transaction rollback failed (original error: {original}): {rollback}")]
    RollbackFailed {
        original: BoxError,
        rollback: BoxError,
    },

    /// The max-errors hook raised; the terminal update's transaction is
    /// aborted and the event remains in its last pre-terminal state.
    #[error("max-errors hook failed: {0}")]
    Hook(#[source] BoxError),

    /// `stop()` did not drain in-flight work within the configured timeout.
    #[error("shutdown did not complete within {0:?}")]
    ShutdownTimeout(std::time::Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_message() {
        let e = HandlerError::transient("boom");
        assert_eq!(e.message(), "boom");
        assert_eq!(e.to_string(), "boom");
    }

    #[test]
    fn test_backoff_hint_carries_instant() {
        let until = Utc::now() + chrono::Duration::seconds(30);
        let e = HandlerError::backoff_hint("rate limited", until);
        match e {
            HandlerError::BackoffHint { backoff_until, .. } => assert_eq!(backoff_until, until),
            _ => panic!("expected BackoffHint"),
        }
    }
}
