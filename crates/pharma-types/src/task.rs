//! Ingestion task status tracking.
//!
//! A task is created when an upload is accepted and is mutated only by the
//! orchestrator attempt that processes it. Allowed transitions:
//!
//! ```text
//! pending ──> processing ──> completed
//!    │             └───────> failed
//!    └────────────────────> failed
//! ```
//!
//! Completed and failed are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::PharmaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Re-entering processing is allowed so a retried attempt can mark
    /// itself as running again.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Processing)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Processing, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts and error samples of a completed ingestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    /// Non-blank rows read from the file
    pub rows_processed: usize,
    /// Records inserted
    pub created: usize,
    /// Records of the previous snapshot that were replaced
    pub removed: usize,
    /// Rows rejected by the parser
    pub errors: usize,
    /// Rows dropped as in-file duplicates
    #[serde(default)]
    pub duplicates: usize,
    /// First few row errors, `"Row error: ... | Data: ..."`
    pub error_details: Vec<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Result payload stored on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskResult {
    Summary(IngestionSummary),
    Failure { error: String },
}

impl TaskResult {
    pub fn failure(error: impl Into<String>) -> Self {
        TaskResult::Failure {
            error: error.into(),
        }
    }

    pub fn summary(&self) -> Option<&IngestionSummary> {
        match self {
            TaskResult::Summary(summary) => Some(summary),
            TaskResult::Failure { .. } => None,
        }
    }
}

/// Status record of one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionTask {
    pub task_id: String,
    /// Branch slug from the upload URL, e.g. "novamedika"
    pub branch_slug: String,
    pub branch_number: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<TaskResult>,
    /// Attempts started so far
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    /// Error of the most recent failed attempt, kept while retries remain
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl IngestionTask {
    /// Create a pending task with a fresh, time-ordered id.
    pub fn new(
        branch_slug: impl Into<String>,
        branch_number: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Ulid::new().to_string(),
            branch_slug: branch_slug.into(),
            branch_number: branch_number.into(),
            status: TaskStatus::Pending,
            result: None,
            attempts: 0,
            max_attempts,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), PharmaError> {
        if !self.status.can_transition_to(next) {
            return Err(PharmaError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the start of an attempt.
    pub fn begin_attempt(&mut self) -> Result<(), PharmaError> {
        self.transition(TaskStatus::Processing)?;
        self.attempts += 1;
        Ok(())
    }

    pub fn complete(&mut self, summary: IngestionSummary) -> Result<(), PharmaError> {
        self.transition(TaskStatus::Completed)?;
        self.result = Some(TaskResult::Summary(summary));
        self.last_error = None;
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), PharmaError> {
        let error = error.into();
        self.transition(TaskStatus::Failed)?;
        self.last_error = Some(error.clone());
        self.result = Some(TaskResult::failure(error));
        Ok(())
    }

    /// Record a failed attempt that will be retried. Status stays processing.
    pub fn record_retry(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.updated_at = Utc::now();
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
    fn test_happy_path_transitions() {
        let mut task = IngestionTask::new("novamedika", "12", 4);
        assert_eq!(task.status, TaskStatus::Pending);

        task.begin_attempt().unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.attempts, 1);

        task.complete(IngestionSummary {
            created: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_ref().and_then(|r| r.summary()).unwrap().created, 3);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut task = IngestionTask::new("novamedika", "12", 4);
        task.begin_attempt().unwrap();
        task.fail("boom").unwrap();

        let err = task.begin_attempt().unwrap_err();
        assert!(matches!(
            err,
            PharmaError::InvalidTransition {
                from: TaskStatus::Failed,
                to: TaskStatus::Processing
            }
        ));
        assert!(task.complete(IngestionSummary::default()).is_err());
    }

    #[test]
    fn test_pending_may_fail_directly() {
        let mut task = IngestionTask::new("unknown", "1", 4);
        task.fail("Unknown branch slug: unknown").unwrap();
        assert_eq!(
            task.result,
            Some(TaskResult::failure("Unknown branch slug: unknown"))
        );
    }

    #[test]
    fn test_pending_cannot_complete() {
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_retry_keeps_processing() {
        let mut task = IngestionTask::new("ekliniya", "3", 4);
        task.begin_attempt().unwrap();
        task.record_retry("storage unavailable");
        assert_eq!(task.status, TaskStatus::Processing);
        task.begin_attempt().unwrap();
        assert_eq!(task.attempts, 2);
        assert_eq!(task.last_error.as_deref(), Some("storage unavailable"));
    }

    #[test]
    fn test_result_json_shape() {
        let failure = serde_json::to_value(TaskResult::failure("bad")).unwrap();
        assert_eq!(failure, serde_json::json!({"error": "bad"}));

        let summary = serde_json::to_value(TaskResult::Summary(IngestionSummary {
            created: 2,
            errors: 1,
            error_details: vec!["Row error: x".to_string()],
            ..Default::default()
        }))
        .unwrap();
        assert_eq!(summary["created"], 2);
        assert_eq!(summary["errors"], 1);

        let decoded: TaskResult = serde_json::from_value(summary).unwrap();
        assert!(decoded.summary().is_some());
    }
}
