//! Error types for index synchronization.

use pharma_search::SearchError;
use pharma_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while synchronizing the product index
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search backend operation failed
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Checkpoint load/save issues
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Blocking storage task did not complete
    #[error("Background task failed: {0}")]
    Join(String),
}

impl From<serde_json::Error> for IndexingError {
    fn from(err: serde_json::Error) -> Self {
        IndexingError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexingError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexingError::Join(err.to_string())
    }
}
