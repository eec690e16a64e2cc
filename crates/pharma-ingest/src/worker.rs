//! Background ingestion worker.
//!
//! Polls the durable job queue, runs claimed jobs through the
//! orchestrator and applies the retry policy. A claim leases the job: it
//! stays queued with a later ready time, so a crash mid-attempt leaves it
//! to be picked up again once the lease runs out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pharma_storage::Storage;
use pharma_types::{IngestSettings, IngestionJob, IngestionTask, TaskStatus};

use crate::error::IngestError;
use crate::orchestrator::IngestionOrchestrator;
use crate::retry::{AttemptOutcome, RetryDecision, RetryPolicy};

/// Worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed in parallel
    pub concurrency: usize,
    /// Idle wait between queue polls
    pub poll_interval: Duration,
    /// How long a claimed job is hidden from other claims
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(600),
        }
    }
}

impl WorkerConfig {
    pub fn from_settings(settings: &IngestSettings) -> Self {
        Self {
            concurrency: settings.worker_concurrency.max(1),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            ..Default::default()
        }
    }
}

/// Runs queued ingestion jobs.
pub struct IngestionWorker {
    orchestrator: IngestionOrchestrator,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl IngestionWorker {
    pub fn new(
        orchestrator: IngestionOrchestrator,
        policy: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            policy,
            config,
        }
    }

    fn storage(&self) -> Arc<Storage> {
        self.orchestrator.storage().clone()
    }

    /// Claim ready jobs and process them. Returns the number claimed.
    pub async fn run_once(&self) -> Result<usize, IngestError> {
        let storage = self.storage();
        let now_ms = Utc::now().timestamp_millis();
        let lease_ms = self.config.lease.as_millis() as i64;
        let limit = self.config.concurrency;
        let jobs = tokio::task::spawn_blocking(move || {
            storage.claim_ready_jobs(now_ms, lease_ms, limit)
        })
        .await??;

        let claimed = jobs.len();
        if claimed > 0 {
            debug!(claimed, "Processing ingestion jobs");
        }
        join_all(jobs.into_iter().map(|job| async move {
            let task_id = job.task_id.clone();
            if let Err(e) = self.process_job(job).await {
                error!(task_id = %task_id, error = %e, "Failed to process ingestion job");
            }
        }))
        .await;
        Ok(claimed)
    }

    /// Poll the queue until cancelled. In-flight jobs run to completion.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            concurrency = self.config.concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Ingestion worker started"
        );
        while !cancel.is_cancelled() {
            let claimed = match self.run_once().await {
                Ok(claimed) => claimed,
                Err(e) => {
                    error!(error = %e, "Failed to poll ingestion queue");
                    0
                }
            };
            if claimed == 0 {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        info!("Ingestion worker stopped");
    }

    /// Run one attempt of a claimed job and settle the task.
    ///
    /// Returns the task status afterwards, or `None` when the job had no
    /// task and was dropped.
    pub async fn process_job(&self, job: IngestionJob) -> Result<Option<TaskStatus>, IngestError> {
        let storage = self.storage();
        let task_id = job.task_id.clone();
        let task = tokio::task::spawn_blocking(move || storage.get_task(&task_id)).await??;

        let Some(mut task) = task else {
            warn!(task_id = %job.task_id, "Dropping job without task");
            self.finish_job(job).await?;
            return Ok(None);
        };
        if task.status.is_terminal() {
            debug!(task_id = %task.task_id, status = %task.status, "Dropping job of settled task");
            self.finish_job(job).await?;
            return Ok(Some(task.status));
        }

        task.begin_attempt()?;
        self.save_task(&task).await?;

        let outcome = self
            .orchestrator
            .ingest(&job.branch_slug, &job.branch_number, job.csv_text.clone())
            .await;
        let decision = self.policy.decide(&outcome, task.attempts);

        let error = match outcome {
            AttemptOutcome::Completed(mut summary) => {
                summary.encoding = job.encoding.clone();
                let created = summary.created;
                task.complete(summary)?;
                self.save_task(&task).await?;
                self.finish_job(job).await?;
                info!(
                    task_id = %task.task_id,
                    attempt = task.attempts,
                    created,
                    "Ingestion completed"
                );
                return Ok(Some(task.status));
            }
            AttemptOutcome::Retryable(e) | AttemptOutcome::Fatal(e) => e.to_string(),
        };

        match decision {
            RetryDecision::RetryAfter(delay) => {
                task.record_retry(error.clone());
                self.save_task(&task).await?;
                let not_before = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                let next = job.next_attempt(not_before);
                let storage = self.storage();
                tokio::task::spawn_blocking(move || storage.reschedule_job(&job, &next)).await??;
                warn!(
                    task_id = %task.task_id,
                    attempt = task.attempts,
                    max_attempts = task.max_attempts,
                    retry_in_secs = delay.as_secs(),
                    error = %error,
                    "Ingestion attempt failed, retrying"
                );
            }
            RetryDecision::GiveUp => {
                task.fail(error.clone())?;
                self.save_task(&task).await?;
                self.finish_job(job).await?;
                error!(
                    task_id = %task.task_id,
                    attempts = task.attempts,
                    error = %error,
                    "Ingestion failed"
                );
            }
        }
        Ok(Some(task.status))
    }

    async fn save_task(&self, task: &IngestionTask) -> Result<(), IngestError> {
        let storage = self.storage();
        let task = task.clone();
        tokio::task::spawn_blocking(move || storage.update_task(&task)).await??;
        Ok(())
    }

    async fn finish_job(&self, job: IngestionJob) -> Result<(), IngestError> {
        let storage = self.storage();
        tokio::task::spawn_blocking(move || storage.finish_job(&job)).await??;
        Ok(())
    }
}
