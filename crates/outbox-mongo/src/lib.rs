//! MongoDB storage adapter for `outbox-core`.
//!
//! Implements the adapter contract on the official `mongodb` driver, using
//! an atomic `findOneAndUpdate` lock-token claim as the document-store
//! analogue of `SELECT ... FOR UPDATE SKIP LOCKED` (§3.1, §4.5).

mod row;
mod storage;

pub use row::{CandidateDoc, EventDoc};
pub use storage::{ensure_indexes, MongoStorage, MongoTransaction};
