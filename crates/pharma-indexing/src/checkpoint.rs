//! Checkpoint tracking for the change dispatcher.
//!
//! Records the first outbox sequence not yet applied to the index, so a
//! restarted dispatcher resumes where it stopped. Events after the last
//! saved checkpoint may be applied twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexingError;

/// Storage key of the dispatcher checkpoint
pub const DISPATCH_CHECKPOINT_KEY: &str = "index_dispatch";

/// Persisted dispatcher progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCheckpoint {
    /// First outbox sequence not yet applied
    pub next_sequence: u64,

    /// Timestamp of last processing (milliseconds since epoch for JSON compatibility)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_processed_time: DateTime<Utc>,

    /// Total events applied since checkpoint creation
    pub processed_count: u64,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl DispatchCheckpoint {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            next_sequence: 0,
            last_processed_time: now,
            processed_count: 0,
            created_at: now,
        }
    }

    /// Record that every event up to and including `sequence` was applied.
    pub fn advance(&mut self, sequence: u64, events: u64) {
        self.next_sequence = self.next_sequence.max(sequence + 1);
        self.last_processed_time = Utc::now();
        self.processed_count += events;
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        serde_json::to_vec(self).map_err(IndexingError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexingError> {
        serde_json::from_slice(bytes).map_err(IndexingError::from)
    }
}

impl Default for DispatchCheckpoint {
    fn default() -> Self {
        Self::new()
    }
}
