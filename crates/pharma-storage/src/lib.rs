//! Storage layer for the pharmacy inventory pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for branches, records, tasks, jobs and outbox
//! - Branch and modification-time indexes for replacement and incremental scans
//! - Atomic inventory replacement via WriteBatch
//! - Change outbox sharing the write of the mutation it describes
//! - Leased job queue for the ingestion worker

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod transaction;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::{CheckpointKey, JobKey, OutboxKey};
pub use transaction::InventoryTransaction;
