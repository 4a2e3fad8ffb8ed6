//! Ambient error type shared by the demo binary and the adapter crates.
//!
//! `outbox-core` defines its own taxonomy (see `outbox_core::error`); this type is
//! for the surrounding plumbing — configuration loading, pool setup, the demo server.

use thiserror::Error;

/// Result type alias using our ambient `Error` type
pub type Result<T> = std::result::Result<T, Error>;

/// Ambient (non-engine) error types
#[derive(Debug, Error)]
pub enum Error {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a Config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
