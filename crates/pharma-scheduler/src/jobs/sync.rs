//! Search index synchronization jobs.
//!
//! Three jobs keep the product index converged with storage:
//! - `incremental_index_update`: re-index records modified in the trailing
//!   window (every 2 minutes by default)
//! - `full_index_resync`: re-index everything and sweep orphans (daily at
//!   03:00 by default)
//! - `change_dispatch`: apply pending outbox events (every 30 seconds by
//!   default), a fallback for missed in-process notifications

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use pharma_indexing::{ChangeDispatcher, DispatchResult, IndexSynchronizer, SyncOutcome, SyncStatus};
use pharma_types::SyncSettings;

use crate::registry::JobOutput;
use crate::{SchedulerError, SchedulerService};

pub const INCREMENTAL_UPDATE_JOB: &str = "incremental_index_update";
pub const FULL_RESYNC_JOB: &str = "full_index_resync";
pub const CHANGE_DISPATCH_JOB: &str = "change_dispatch";

/// Schedules of the sync jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJobsConfig {
    pub incremental_cron: String,
    pub full_resync_cron: String,
    pub dispatch_cron: String,
    pub timezone: String,
}

impl Default for SyncJobsConfig {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

impl SyncJobsConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            incremental_cron: settings.incremental_cron.clone(),
            full_resync_cron: settings.full_resync_cron.clone(),
            dispatch_cron: settings.dispatch_cron.clone(),
            timezone: settings.timezone.clone(),
        }
    }
}

/// Job result for a synchronizer outcome. Only a failed outcome fails
/// the job; partial and skipped runs are reported through the counters.
pub fn sync_output(outcome: &SyncOutcome) -> Result<JobOutput, String> {
    if outcome.status == SyncStatus::Failed {
        return Err(outcome
            .reason
            .clone()
            .or_else(|| outcome.errors.first().cloned())
            .unwrap_or_else(|| "sync failed".to_string()));
    }
    let mut output = JobOutput::new()
        .with_metadata("status", format!("{:?}", outcome.status).to_lowercase())
        .with_metadata("indexed", outcome.indexed)
        .with_metadata("deleted", outcome.deleted)
        .with_metadata("failed", outcome.failed);
    if let Some(reason) = &outcome.reason {
        output = output.with_metadata("reason", reason);
    }
    Ok(output)
}

/// Job result for a dispatcher run.
pub fn dispatch_output(result: &DispatchResult) -> Result<JobOutput, String> {
    let output = sync_output(&result.outcome).unwrap_or_default();
    Ok(output
        .with_metadata("events", result.events)
        .with_metadata("stalled", result.stalled))
}

/// Register the incremental, full resync and dispatch jobs.
pub async fn register_sync_jobs(
    scheduler: &SchedulerService,
    synchronizer: Arc<IndexSynchronizer>,
    dispatcher: Arc<ChangeDispatcher>,
    config: &SyncJobsConfig,
) -> Result<(), SchedulerError> {
    let tz = Some(config.timezone.as_str());

    let sync = synchronizer.clone();
    scheduler
        .register_job(
            INCREMENTAL_UPDATE_JOB,
            &config.incremental_cron,
            tz,
            move || {
                let sync = sync.clone();
                async move { sync_output(&sync.incremental_update().await) }
            },
        )
        .await?;

    let sync = synchronizer;
    scheduler
        .register_job(
            FULL_RESYNC_JOB,
            &config.full_resync_cron,
            tz,
            move || {
                let sync = sync.clone();
                async move { sync_output(&sync.full_resync().await) }
            },
        )
        .await?;

    scheduler
        .register_job(
            CHANGE_DISPATCH_JOB,
            &config.dispatch_cron,
            tz,
            move || {
                let dispatcher = dispatcher.clone();
                async move {
                    let result = dispatcher
                        .dispatch_pending()
                        .await
                        .map_err(|e| format!("Dispatch failed: {}", e))?;
                    dispatch_output(&result)
                }
            },
        )
        .await?;

    info!(
        incremental = %config.incremental_cron,
        full_resync = %config.full_resync_cron,
        dispatch = %config.dispatch_cron,
        timezone = %config.timezone,
        "Registered index sync jobs"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharma_indexing::{ChangeNotifier, SyncConfig};
    use pharma_search::{SearchIndexConfig, TantivyBackend};
    use pharma_storage::Storage;
    use tempfile::TempDir;

    use crate::SchedulerConfig;

    #[test]
    fn test_default_schedules() {
        let config = SyncJobsConfig::default();
        assert_eq!(config.incremental_cron, "0 */2 * * * *");
        assert_eq!(config.full_resync_cron, "0 0 3 * * *");
        assert_eq!(config.dispatch_cron, "*/30 * * * * *");
        assert_eq!(config.timezone, "UTC");
    }

    #[test]
    fn test_failed_outcome_fails_job() {
        let err = sync_output(&SyncOutcome::failed("bulk request rejected")).unwrap_err();
        assert_eq!(err, "bulk request rejected");
    }

    #[test]
    fn test_skipped_outcome_reports_reason() {
        let output = sync_output(&SyncOutcome::backend_unavailable()).unwrap();
        assert_eq!(output.metadata["status"], "skipped");
        assert_eq!(output.metadata["reason"], "search backend unavailable");
    }

    #[test]
    fn test_dispatch_output_counts_events() {
        let result = DispatchResult {
            events: 3,
            stalled: true,
            ..Default::default()
        };
        let output = dispatch_output(&result).unwrap();
        assert_eq!(output.metadata["events"], "3");
        assert_eq!(output.metadata["stalled"], "true");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_sync_jobs() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(&temp.path().join("db")).unwrap());
        let backend = Arc::new(TantivyBackend::new(SearchIndexConfig::new(
            temp.path().join("index"),
        )));
        let synchronizer = Arc::new(IndexSynchronizer::new(
            storage.clone(),
            backend,
            SyncConfig::default(),
        ));
        let dispatcher = Arc::new(ChangeDispatcher::new(
            storage,
            synchronizer.clone(),
            ChangeNotifier::new(),
        ));

        let scheduler = SchedulerService::new(SchedulerConfig::default())
            .await
            .unwrap();
        register_sync_jobs(&scheduler, synchronizer, dispatcher, &SyncJobsConfig::default())
            .await
            .unwrap();

        let registry = scheduler.registry();
        assert_eq!(registry.job_count(), 3);
        for name in [INCREMENTAL_UPDATE_JOB, FULL_RESYNC_JOB, CHANGE_DISPATCH_JOB] {
            assert!(registry.get_status(name).is_some(), "{} missing", name);
        }
    }
}
