//! # pharma-indexing
//!
//! Keeps the product search index in step with the system of record.
//!
//! ## Features
//! - `IndexSynchronizer`: incremental update, full resync with orphan sweep,
//!   per-branch and per-record updates, removals
//! - `ChangeDispatcher`: applies storage outbox events in order with a
//!   persisted checkpoint
//! - `ChangeNotifier`: wakes the dispatcher right after a commit

pub mod checkpoint;
pub mod dispatcher;
pub mod error;
pub mod outcome;
pub mod synchronizer;

pub use checkpoint::{DispatchCheckpoint, DISPATCH_CHECKPOINT_KEY};
pub use dispatcher::{ChangeDispatcher, ChangeNotifier, DispatchResult};
pub use error::IndexingError;
pub use outcome::{SyncOutcome, SyncStatus};
pub use synchronizer::{IndexSynchronizer, SyncConfig};
