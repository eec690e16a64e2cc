//! Attempt outcomes and the retry policy applied to them.

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use serde::{Deserialize, Serialize};

use pharma_types::{IngestSettings, IngestionSummary};

use crate::error::IngestError;

/// Result of one ingestion attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Inventory replaced
    Completed(IngestionSummary),
    /// Transient failure, nothing was written
    Retryable(IngestError),
    /// Retrying cannot help
    Fatal(IngestError),
}

impl AttemptOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, AttemptOutcome::Completed(_))
    }
}

/// What to do with a task after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Queue another attempt after the delay
    RetryAfter(Duration),
    /// Mark the task failed
    GiveUp,
}

/// Bounded retries with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self::new(
            settings.max_retries,
            Duration::from_secs(settings.retry_backoff_secs),
        )
    }

    /// Total attempts allowed, first one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Decide after `attempts_made` attempts of which the last one failed.
    pub fn decide(&self, outcome: &AttemptOutcome, attempts_made: u32) -> RetryDecision {
        match outcome {
            AttemptOutcome::Retryable(_) if attempts_made < self.max_attempts() => {
                let mut backoff = Constant::new(self.backoff);
                match backoff.next_backoff() {
                    Some(delay) => RetryDecision::RetryAfter(delay),
                    None => RetryDecision::GiveUp,
                }
            }
            _ => RetryDecision::GiveUp,
        }
    }
}
