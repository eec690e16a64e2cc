//! Result of one synchronizer operation.

use serde::Serialize;

use pharma_search::BulkResponse;

/// Per-item error messages kept in an outcome
const ERROR_SAMPLE_LIMIT: usize = 10;

const REASON_BACKEND_UNAVAILABLE: &str = "search backend unavailable";

/// Overall status of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Partial,
    Failed,
    Skipped,
}

/// Counts and error samples of a sync operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub status: SyncStatus,
    /// Documents written
    pub indexed: usize,
    /// Documents removed
    pub deleted: usize,
    /// Items rejected by the backend or lost with a failed chunk
    pub failed: usize,
    /// Records that could not be projected (e.g. branch missing)
    pub skipped: usize,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SyncOutcome {
    /// An outcome still being accumulated; call [`SyncOutcome::finish`].
    pub fn new() -> Self {
        Self {
            status: SyncStatus::Success,
            indexed: 0,
            deleted: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
            reason: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Skipped,
            reason: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: SyncStatus::Failed,
            errors: vec![reason.clone()],
            reason: Some(reason),
            ..Self::new()
        }
    }

    pub fn backend_unavailable() -> Self {
        Self::skipped(REASON_BACKEND_UNAVAILABLE)
    }

    /// Whether nothing was attempted because the backend was unreachable.
    pub fn is_backend_unavailable(&self) -> bool {
        self.status == SyncStatus::Skipped
            && self.reason.as_deref() == Some(REASON_BACKEND_UNAVAILABLE)
    }

    pub fn push_error(&mut self, error: impl Into<String>) {
        if self.errors.len() < ERROR_SAMPLE_LIMIT {
            self.errors.push(error.into());
        }
    }

    /// Fold a bulk response of upserts into the counters.
    pub fn record_indexed(&mut self, response: BulkResponse) {
        self.indexed += response.succeeded;
        self.record_failures(response);
    }

    /// Fold a bulk response of deletes into the counters.
    pub fn record_deleted(&mut self, response: BulkResponse) {
        self.deleted += response.succeeded;
        self.record_failures(response);
    }

    fn record_failures(&mut self, response: BulkResponse) {
        self.failed += response.failures.len();
        for failure in response.failures {
            self.push_error(format!("{}: {}", failure.id, failure.reason));
        }
    }

    /// A whole chunk was lost.
    pub fn record_chunk_failure(&mut self, items: usize, error: impl std::fmt::Display) {
        self.failed += items;
        self.push_error(error.to_string());
    }

    /// Records of a chunk could not be read from storage.
    pub fn record_read_failure(&mut self, items: usize, error: impl std::fmt::Display) {
        let message = format!("storage read: {}", error);
        self.record_chunk_failure(items, &message);
        self.reason.get_or_insert(message);
    }

    /// Whether running the same operation again can do better: the backend
    /// was down, the index could not be prepared or storage could not be
    /// read. Items the backend rejected are only counted.
    pub fn should_retry(&self) -> bool {
        self.is_backend_unavailable()
            || (self.status != SyncStatus::Skipped && self.reason.is_some())
    }

    /// Derive the status from the counters.
    pub fn finish(mut self) -> Self {
        if self.status == SyncStatus::Skipped {
            return self;
        }
        self.status = if self.failed == 0 && self.errors.is_empty() {
            SyncStatus::Success
        } else if self.indexed + self.deleted > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };
        self
    }

    /// Merge another finished outcome into this one.
    pub fn merge(&mut self, other: &SyncOutcome) {
        self.indexed += other.indexed;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.skipped += other.skipped;
        for error in &other.errors {
            self.push_error(error.clone());
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Success
    }
}

impl Default for SyncOutcome {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharma_search::BulkFailure;

    #[test]
    fn test_status_from_counts() {
        let mut outcome = SyncOutcome::new();
        outcome.record_indexed(BulkResponse {
            succeeded: 3,
            failures: vec![],
        });
        assert_eq!(outcome.finish().status, SyncStatus::Success);

        let mut outcome = SyncOutcome::new();
        outcome.record_indexed(BulkResponse {
            succeeded: 2,
            failures: vec![BulkFailure {
                id: "x".into(),
                reason: "bad".into(),
            }],
        });
        let outcome = outcome.finish();
        assert_eq!(outcome.status, SyncStatus::Partial);
        assert_eq!(outcome.errors, vec!["x: bad".to_string()]);

        let mut outcome = SyncOutcome::new();
        outcome.record_chunk_failure(5, "connection reset");
        let outcome = outcome.finish();
        assert_eq!(outcome.status, SyncStatus::Failed);
        assert_eq!(outcome.failed, 5);
    }

    #[test]
    fn test_skipped_survives_finish() {
        let outcome = SyncOutcome::backend_unavailable().finish();
        assert_eq!(outcome.status, SyncStatus::Skipped);
        assert!(outcome.is_backend_unavailable());
        assert!(!SyncOutcome::skipped("empty").is_backend_unavailable());
    }

    #[test]
    fn test_rejected_items_are_not_retried() {
        let mut outcome = SyncOutcome::new();
        outcome.record_indexed(BulkResponse {
            succeeded: 0,
            failures: vec![BulkFailure {
                id: "x".into(),
                reason: "mapper_parsing_exception".into(),
            }],
        });
        let outcome = outcome.finish();
        assert_eq!(outcome.status, SyncStatus::Failed);
        assert!(!outcome.should_retry());

        let mut outcome = SyncOutcome::new();
        outcome.record_read_failure(3, "io error");
        let outcome = outcome.finish();
        assert_eq!(outcome.failed, 3);
        assert_eq!(outcome.reason.as_deref(), Some("storage read: io error"));
        assert!(outcome.should_retry());

        assert!(SyncOutcome::backend_unavailable().should_retry());
        assert!(SyncOutcome::failed("ensure index: locked").should_retry());
        assert!(!SyncOutcome::skipped("no records to index").should_retry());
    }

    #[test]
    fn test_error_sample_is_capped() {
        let mut outcome = SyncOutcome::new();
        for i in 0..25 {
            outcome.record_chunk_failure(1, format!("error {}", i));
        }
        assert_eq!(outcome.failed, 25);
        assert_eq!(outcome.errors.len(), ERROR_SAMPLE_LIMIT);
    }

    #[test]
    fn test_serializes_status_snake_case() {
        let json = serde_json::to_value(SyncOutcome::skipped("no records")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "no records");
    }
}
