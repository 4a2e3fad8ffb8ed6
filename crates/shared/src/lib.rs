//! Shared ambient stack for the outbox event processor workspace
//!
//! This crate provides the plumbing that every crate in the workspace needs but
//! that has nothing to do with the processor's domain logic:
//! - Configuration loading from the environment
//! - PostgreSQL connection pooling
//! - A small ambient error type
//! - Structured logging initialization
//! - A retry-with-backoff helper, a cancellable sleep helper, and a deep-clone
//!   helper — the out-of-scope collaborators the engine consumes but does not own

pub mod clock;
pub mod config;
pub mod db;
pub mod deep_clone;
pub mod error;
pub mod retry;

pub use config::Config;
pub use db::DbPool;
pub use error::{Error, Result};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,outbox_core=debug,outbox_demo=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
