//! # pharma-types
//!
//! Shared domain types for the pharmacy inventory pipeline.
//!
//! This crate defines the core data structures used throughout the system:
//! - Branches: pharmacy outlets identified by (name, number)
//! - Inventory records: one stocked product line of a branch
//! - Ingestion tasks: status and result of one CSV upload
//! - Change events: outbox entries that drive search index updates
//! - Settings: layered configuration

pub mod branch;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod outbox;
pub mod record;
pub mod task;

pub use branch::{slugify, Branch, BranchChange, NEW_BRANCH_CITY};
pub use config::{IngestSettings, Settings, SyncSettings};
pub use document::SearchDocument;
pub use error::PharmaError;
pub use job::IngestionJob;
pub use outbox::{ChangeEvent, ChangeKind};
pub use record::{normalize_serial, InventoryRecord, RecordDraft};
pub use task::{IngestionSummary, IngestionTask, TaskResult, TaskStatus};
