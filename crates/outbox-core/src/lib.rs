//! Transactional outbox event processor core.
//!
//! This crate is the execution engine only: the polling/dispatch loop, the
//! per-event transactional state machine, and the pluggable storage-adapter
//! contract. It has no opinion on *how* events get persisted — `outbox-postgres`
//! and `outbox-mongo` implement [`storage::ReadSide`]/[`storage::TransactionalWriteSide`]
//! against their respective stores.
//!
//! ```ignore
//! let processor = Processor::new(read_side, write_side, handlers, options);
//! processor.start().await;
//! // ...
//! processor.stop(Duration::from_secs(10)).await?;
//! ```

pub mod backoff;
pub mod clock;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod handler;
pub mod lifecycle;
pub mod options;
pub mod poller;
pub mod state_machine;
pub mod storage;
pub mod throttle;
pub mod wakeup;

pub use backoff::{default_backoff_policy, BackoffPolicy};
pub use error::{BoxError, CoreError, HandlerError};
pub use event::{Event, HandlerErrorRecord, HandlerResult};
pub use handler::{BoxHandler, Handler, HandlerGroup, HandlerMap, MaxErrorsHook};
pub use lifecycle::Processor;
pub use options::{ProcessorOptions, ProcessorOptionsBuilder};
pub use state_machine::{process_event, Outcome};
pub use storage::{CandidateEvent, ReadSide, Storage, TransactionalWriteSide, WriteTransaction};
pub use wakeup::{NoopWakeupEmitter, WakeupEmitter};
