//! Search error types.

use thiserror::Error;

/// Errors that can occur during index and search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Tantivy index error
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// Query parse error
    #[error("Query parse error: {0}")]
    QueryParse(#[from] tantivy::query::QueryParserError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No index was created at the path yet
    #[error("No product index at {0}")]
    IndexMissing(String),

    /// Schema mismatch
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Index writer lock poisoned by a panicked writer
    #[error("Index is locked: {0}")]
    IndexLocked(String),

    /// Backend cannot be reached
    #[error("Search backend unavailable: {0}")]
    Unavailable(String),

    /// Blocking index task failed to complete
    #[error("Index task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for SearchError {
    fn from(err: tokio::task::JoinError) -> Self {
        SearchError::Join(err.to_string())
    }
}
