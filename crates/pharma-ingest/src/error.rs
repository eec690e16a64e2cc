//! Error types for CSV ingestion.

use thiserror::Error;

use pharma_storage::StorageError;
use pharma_types::PharmaError;

/// Errors that can occur while accepting or processing an upload
#[derive(Error, Debug)]
pub enum IngestError {
    /// Upload rejected before a task exists
    #[error("Validation error: {0}")]
    Validation(String),

    /// Branch slug not on the allow-list
    #[error("Invalid pharmacy: {0}")]
    UnknownBranch(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Task state machine rejected an update
    #[error("Task error: {0}")]
    Task(#[from] PharmaError),

    #[error("Background task failed: {0}")]
    Join(String),
}

impl IngestError {
    /// Whether the error is the caller's fault and should be reported as
    /// a bad request.
    pub fn is_validation(&self) -> bool {
        matches!(self, IngestError::Validation(_) | IngestError::UnknownBranch(_))
    }
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Join(err.to_string())
    }
}
