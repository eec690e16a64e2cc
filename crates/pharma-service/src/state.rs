use std::sync::Arc;

use pharma_ingest::IngestionOrchestrator;
use pharma_scheduler::JobRegistry;
use pharma_search::SearchBackend;
use pharma_storage::Storage;

/// Default request body limit for uploads
pub const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: IngestionOrchestrator,
    pub backend: Arc<dyn SearchBackend>,
    /// Present when the daemon runs the scheduler in-process
    pub jobs: Option<Arc<JobRegistry>>,
    pub upload_limit_bytes: usize,
}

impl ApiState {
    pub fn new(orchestrator: IngestionOrchestrator, backend: Arc<dyn SearchBackend>) -> Self {
        Self {
            orchestrator,
            backend,
            jobs: None,
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT_BYTES,
        }
    }

    pub fn with_jobs(mut self, registry: Arc<JobRegistry>) -> Self {
        self.jobs = Some(registry);
        self
    }

    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit_bytes = bytes;
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        self.orchestrator.storage()
    }
}
