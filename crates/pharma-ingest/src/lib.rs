//! # pharma-ingest
//!
//! CSV inventory ingestion for pharmacy branches.
//!
//! An upload is decoded ([`encoding`]), queued as a pending task, and
//! later replaced into storage by the [`IngestionWorker`] through the
//! [`IngestionOrchestrator`]. Rows are parsed one at a time by
//! [`parser::parse_row`]; bad rows are counted and sampled, never fatal.

pub mod encoding;
pub mod error;
pub mod forms;
pub mod orchestrator;
pub mod parser;
pub mod retry;
pub mod worker;

pub use encoding::{decode_upload, detect_encoding, DecodedUpload};
pub use error::IngestError;
pub use forms::split_name_and_form;
pub use orchestrator::IngestionOrchestrator;
pub use parser::{parse_row, RowError, COLUMNS};
pub use retry::{AttemptOutcome, RetryDecision, RetryPolicy};
pub use worker::{IngestionWorker, WorkerConfig};
