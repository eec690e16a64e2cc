//! Durable ingestion job queued for the background worker.

use serde::{Deserialize, Serialize};

/// One queued ingestion attempt. Shares its id with the `IngestionTask`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub task_id: String,
    pub branch_slug: String,
    pub branch_number: String,
    /// Decoded CSV text
    pub csv_text: String,
    /// Encoding label the upload was decoded with
    #[serde(default)]
    pub encoding: Option<String>,
    /// Attempts already made before this one
    #[serde(default)]
    pub attempt: u32,
    /// Earliest time (ms since epoch) the worker may claim the job
    #[serde(default)]
    pub not_before_ms: i64,
}

impl IngestionJob {
    pub fn new(
        task_id: impl Into<String>,
        branch_slug: impl Into<String>,
        branch_number: impl Into<String>,
        csv_text: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            branch_slug: branch_slug.into(),
            branch_number: branch_number.into(),
            csv_text: csv_text.into(),
            encoding: None,
            attempt: 0,
            not_before_ms: 0,
        }
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// The same job rescheduled for another attempt.
    pub fn next_attempt(&self, not_before_ms: i64) -> Self {
        Self {
            attempt: self.attempt + 1,
            not_before_ms,
            ..self.clone()
        }
    }

    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.not_before_ms <= now_ms
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt() {
        let job = IngestionJob::new("t1", "novamedika", "12", "a;b");
        assert!(job.is_ready(0));

        let retry = job.next_attempt(60_000);
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.task_id, "t1");
        assert!(!retry.is_ready(59_999));
        assert!(retry.is_ready(60_000));
    }
}
