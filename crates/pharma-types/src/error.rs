//! Error types shared across the pharmacy pipeline.

use thiserror::Error;

use crate::task::TaskStatus;

/// Unified error type for domain-level operations.
#[derive(Debug, Error)]
pub enum PharmaError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Task status change that the state machine does not allow
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}
