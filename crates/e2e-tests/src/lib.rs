//! End-to-end test infrastructure for the pharmacy inventory pipeline.
//!
//! Provides a shared TestHarness wiring real storage, a real product index,
//! the ingestion worker and the change dispatcher, plus CSV helpers.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use pharma_indexing::{
    ChangeDispatcher, ChangeNotifier, DispatchResult, IndexSynchronizer, SyncConfig,
};
use pharma_ingest::{IngestionOrchestrator, IngestionWorker, RetryPolicy, WorkerConfig};
use pharma_search::{
    BulkOp, BulkResponse, ProductSearcher, SearchBackend, SearchError, SearchIndexConfig,
    TantivyBackend,
};
use pharma_storage::Storage;
use pharma_types::{IngestSettings, IngestionTask};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub backend: Arc<TantivyBackend>,
    pub synchronizer: Arc<IndexSynchronizer>,
    pub dispatcher: Arc<ChangeDispatcher>,
    pub orchestrator: IngestionOrchestrator,
    pub worker: IngestionWorker,
}

impl TestHarness {
    /// Harness with default ingest settings and a small sync chunk size.
    pub fn new() -> Self {
        Self::with_settings(IngestSettings::default())
    }

    pub fn with_settings(settings: IngestSettings) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage = Arc::new(
            Storage::open(&temp_dir.path().join("db")).expect("Failed to open test storage"),
        );
        let backend = Arc::new(TantivyBackend::new(SearchIndexConfig::new(
            temp_dir.path().join("products-index"),
        )));
        let synchronizer = Arc::new(IndexSynchronizer::new(
            storage.clone(),
            backend.clone(),
            SyncConfig::default().with_chunk_size(2),
        ));
        let notifier = ChangeNotifier::new();
        let dispatcher = Arc::new(ChangeDispatcher::new(
            storage.clone(),
            synchronizer.clone(),
            notifier.clone(),
        ));
        let worker_config = WorkerConfig::from_settings(&settings);
        let policy = RetryPolicy::from_settings(&settings);
        let orchestrator =
            IngestionOrchestrator::new(storage.clone(), settings).with_notifier(notifier);
        let worker = IngestionWorker::new(orchestrator.clone(), policy, worker_config);

        Self {
            _temp_dir: temp_dir,
            storage,
            backend,
            synchronizer,
            dispatcher,
            orchestrator,
            worker,
        }
    }

    /// Queue an upload and run the worker once. Returns the settled task.
    pub async fn upload(&self, branch_slug: &str, branch_number: &str, csv: &str) -> IngestionTask {
        let task_id = self
            .orchestrator
            .submit_upload(branch_slug, branch_number, Some("stock.csv"), csv.as_bytes())
            .await
            .expect("Upload rejected");
        self.worker.run_once().await.expect("Worker poll failed");
        self.storage
            .get_task(&task_id)
            .expect("Failed to read task")
            .expect("Task missing")
    }

    /// Upload, then apply the resulting change events to the index.
    pub async fn upload_and_sync(
        &self,
        branch_slug: &str,
        branch_number: &str,
        csv: &str,
    ) -> (IngestionTask, DispatchResult) {
        let task = self.upload(branch_slug, branch_number, csv).await;
        let dispatch = self
            .dispatcher
            .dispatch_pending()
            .await
            .expect("Dispatch failed");
        (task, dispatch)
    }

    pub async fn searcher(&self) -> ProductSearcher {
        self.backend.searcher().await.expect("Failed to open searcher")
    }

    /// Sorted ids of every indexed document.
    pub async fn indexed_ids(&self) -> Vec<String> {
        let mut ids = self
            .backend
            .document_ids()
            .await
            .expect("Failed to list documents");
        ids.sort();
        ids
    }

    /// Sorted ids of every stored record of one branch.
    pub fn stored_ids(&self, name: &str, number: &str) -> Vec<String> {
        let Some(branch) = self
            .storage
            .find_branch(name, number)
            .expect("Failed to read branch")
        else {
            return Vec::new();
        };
        let mut ids: Vec<String> = self
            .storage
            .record_ids_for_branch(&branch.branch_id)
            .expect("Failed to read records")
            .iter()
            .map(Uuid::to_string)
            .collect();
        ids.sort();
        ids
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// One 16-column inventory row with a pharmaceutical category.
pub fn csv_row(product: &str, serial: &str, expiry: &str) -> String {
    format!(
        "{};Bayer;Германия;{};10,50;2;;{};Лексредства;15.01.2024;C-1;9,00;10,50;БелФарм;1;12",
        product, serial, expiry
    )
}

/// Join rows into an upload body.
pub fn csv_of(rows: &[String]) -> String {
    rows.join("\n")
}

/// Backend that is never reachable.
pub struct OfflineBackend;

#[async_trait]
impl SearchBackend for OfflineBackend {
    async fn ensure_index(&self) -> Result<bool, SearchError> {
        Err(SearchError::Unavailable("offline".into()))
    }
    async fn bulk(&self, _ops: Vec<BulkOp>) -> Result<BulkResponse, SearchError> {
        Err(SearchError::Unavailable("offline".into()))
    }
    async fn refresh(&self) -> Result<(), SearchError> {
        Err(SearchError::Unavailable("offline".into()))
    }
    async fn ping(&self) -> bool {
        false
    }
    async fn count(&self) -> Result<u64, SearchError> {
        Err(SearchError::Unavailable("offline".into()))
    }
    async fn document_ids(&self) -> Result<Vec<String>, SearchError> {
        Err(SearchError::Unavailable("offline".into()))
    }
}
