//! Predefined jobs.
//!
//! - **sync**: incremental index update, nightly full resync and outbox
//!   dispatch

pub mod sync;

pub use sync::{
    dispatch_output, register_sync_jobs, sync_output, SyncJobsConfig, CHANGE_DISPATCH_JOB,
    FULL_RESYNC_JOB, INCREMENTAL_UPDATE_JOB,
};
