//! Background job scheduler for the pharmacy sync daemon.
//!
//! Wraps `tokio-cron-scheduler` with timezone-aware cron jobs, a job
//! registry for status reporting, overlap protection and graceful
//! shutdown via `CancellationToken`.
//!
//! ```ignore
//! use pharma_scheduler::{register_sync_jobs, SchedulerConfig, SchedulerService, SyncJobsConfig};
//!
//! let scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! register_sync_jobs(&scheduler, synchronizer, dispatcher, &SyncJobsConfig::default()).await?;
//! scheduler.start().await?;
//! ```

mod config;
mod error;
pub mod jobs;
mod overlap;
mod registry;
mod scheduler;

pub use config::SchedulerConfig;
pub use error::SchedulerError;
pub use jobs::{register_sync_jobs, SyncJobsConfig};
pub use overlap::{OverlapGuard, RunGuard};
pub use registry::{JobOutput, JobRegistry, JobResult, JobStatus};
pub use scheduler::{validate_cron_expression, SchedulerService};
