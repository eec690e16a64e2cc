//! Job registry: last run, duration, result and counters per scheduled job.
//!
//! The daemon's `status` command and the health endpoint read it.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of a job execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobResult {
    Success,
    Failed(String),
    /// Not run, e.g. previous run still active
    Skipped(String),
}

/// Counters reported by a finished run, e.g. documents indexed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub metadata: BTreeMap<String, String>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Status of a registered job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_name: String,
    pub cron_expr: String,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_result: Option<JobResult>,
    pub run_count: u64,
    pub error_count: u64,
    pub is_running: bool,
    /// Counters of the last successful run
    #[serde(default)]
    pub last_run_metadata: BTreeMap<String, String>,
}

impl JobStatus {
    fn new(job_name: &str, cron_expr: &str) -> Self {
        Self {
            job_name: job_name.to_string(),
            cron_expr: cron_expr.to_string(),
            last_run: None,
            last_duration_ms: None,
            last_result: None,
            run_count: 0,
            error_count: 0,
            is_running: false,
            last_run_metadata: BTreeMap::new(),
        }
    }
}

/// Thread-safe registry of job statuses.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<BTreeMap<String, JobStatus>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, job_name: &str, f: impl FnOnce(&mut JobStatus)) {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = jobs.get_mut(job_name) {
            f(status);
        }
    }

    /// Register a job. Returns `false` if the name is taken.
    pub fn register(&self, job_name: &str, cron_expr: &str) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(job_name) {
            return false;
        }
        jobs.insert(job_name.to_string(), JobStatus::new(job_name, cron_expr));
        true
    }

    pub fn unregister(&self, job_name: &str) {
        self.jobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_name);
    }

    pub fn record_start(&self, job_name: &str) {
        self.update(job_name, |status| status.is_running = true);
    }

    pub fn record_complete(&self, job_name: &str, result: JobResult, duration_ms: u64) {
        self.record_complete_with_output(job_name, result, duration_ms, JobOutput::new());
    }

    /// Record a finished run. Skipped runs do not touch `last_run` or the
    /// running flag of the active run.
    pub fn record_complete_with_output(
        &self,
        job_name: &str,
        result: JobResult,
        duration_ms: u64,
        output: JobOutput,
    ) {
        self.update(job_name, |status| {
            status.run_count += 1;
            match &result {
                JobResult::Skipped(_) => {}
                JobResult::Failed(_) => {
                    status.error_count += 1;
                    status.is_running = false;
                    status.last_run = Some(Utc::now());
                    status.last_duration_ms = Some(duration_ms);
                }
                JobResult::Success => {
                    status.is_running = false;
                    status.last_run = Some(Utc::now());
                    status.last_duration_ms = Some(duration_ms);
                    status.last_run_metadata = output.metadata;
                }
            }
            status.last_result = Some(result);
        });
    }

    pub fn get_status(&self, job_name: &str) -> Option<JobStatus> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_name)
            .cloned()
    }

    /// All jobs, ordered by name.
    pub fn get_all_status(&self) -> Vec<JobStatus> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn is_running(&self, job_name: &str) -> bool {
        self.get_status(job_name).is_some_and(|s| s.is_running)
    }

    pub fn any_running(&self) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|s| s.is_running)
    }

    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
