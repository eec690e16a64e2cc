//! Index synchronizer: pull-based reconciliation of the product index
//! from storage.
//!
//! Every operation ensures the index exists, reads the affected records
//! from storage, writes chunked bulk requests, refreshes once at the end and
//! reports a [`SyncOutcome`]. Operations never return errors; failures are
//! folded into the outcome. Writes are upserts by record id, so every
//! operation is idempotent and concurrent callers converge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pharma_search::{BulkOp, SearchBackend};
use pharma_storage::{Storage, StorageError};
use pharma_types::{Branch, SearchDocument, SyncSettings};

use crate::error::IndexingError;
use crate::outcome::SyncOutcome;

/// Synchronizer tuning.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Documents per bulk request
    pub chunk_size: usize,
    /// Trailing window scanned by `incremental_update`
    pub incremental_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 3_000,
            incremental_window: Duration::from_secs(120),
        }
    }
}

impl SyncConfig {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size.max(1),
            incremental_window: Duration::from_secs(settings.incremental_window_secs),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

/// Branch rows loaded during one operation; `None` marks a missing branch.
type BranchCache = HashMap<Uuid, Option<Branch>>;

/// Keeps the product index consistent with storage.
pub struct IndexSynchronizer {
    storage: Arc<Storage>,
    backend: Arc<dyn SearchBackend>,
    config: SyncConfig,
}

impl IndexSynchronizer {
    pub fn new(storage: Arc<Storage>, backend: Arc<dyn SearchBackend>, config: SyncConfig) -> Self {
        Self {
            storage,
            backend,
            config,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Run a storage read on the blocking pool.
    async fn with_storage<T, F>(&self, f: F) -> Result<T, IndexingError>
    where
        F: FnOnce(&Storage) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        Ok(tokio::task::spawn_blocking(move || f(&storage)).await??)
    }

    /// Ping and ensure the index. Returns the outcome to report on failure.
    async fn prepare(&self) -> Result<(), SyncOutcome> {
        if !self.backend.ping().await {
            warn!(
                index = self.backend.index_name(),
                "Search backend unreachable, skipping sync"
            );
            return Err(SyncOutcome::backend_unavailable());
        }
        match self.backend.ensure_index().await {
            Ok(created) => {
                if created {
                    info!(index = self.backend.index_name(), "Created missing index");
                }
                Ok(())
            }
            Err(e) => {
                error!(index = self.backend.index_name(), error = %e, "Failed to ensure index");
                Err(SyncOutcome::failed(format!("ensure index: {}", e)))
            }
        }
    }

    async fn bulk_index(&self, ops: Vec<BulkOp>, outcome: &mut SyncOutcome) {
        let count = ops.len();
        match self.backend.bulk(ops).await {
            Ok(response) => outcome.record_indexed(response),
            Err(e) => {
                warn!(items = count, error = %e, "Bulk index request failed");
                outcome.record_chunk_failure(count, e);
            }
        }
    }

    async fn bulk_delete(&self, ops: Vec<BulkOp>, outcome: &mut SyncOutcome) {
        let count = ops.len();
        match self.backend.bulk(ops).await {
            Ok(response) => outcome.record_deleted(response),
            Err(e) => {
                warn!(items = count, error = %e, "Bulk delete request failed");
                outcome.record_chunk_failure(count, e);
            }
        }
    }

    async fn refresh(&self, outcome: &mut SyncOutcome) {
        if let Err(e) = self.backend.refresh().await {
            error!(index = self.backend.index_name(), error = %e, "Index refresh failed");
            outcome.push_error(format!("refresh: {}", e));
        }
    }

    /// Index one chunk of record ids. Ids no longer in storage are deleted
    /// from the index.
    async fn index_chunk(
        &self,
        ids: Vec<Uuid>,
        branches: &mut BranchCache,
        outcome: &mut SyncOutcome,
    ) -> Result<(), IndexingError> {
        let wanted = ids.clone();
        let records = self.with_storage(move |s| s.get_records(&wanted)).await?;

        let unknown: Vec<Uuid> = records
            .iter()
            .map(|r| r.branch_id)
            .filter(|id| !branches.contains_key(id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if !unknown.is_empty() {
            let loaded = self
                .with_storage(move |s| {
                    unknown
                        .into_iter()
                        .map(|id| Ok((id, s.get_branch(&id)?)))
                        .collect::<Result<Vec<_>, StorageError>>()
                })
                .await?;
            branches.extend(loaded);
        }

        let found: HashSet<Uuid> = records.iter().map(|r| r.record_id).collect();
        let mut upserts = Vec::with_capacity(records.len());
        for record in &records {
            match branches.get(&record.branch_id).and_then(Option::as_ref) {
                Some(branch) => upserts.push(BulkOp::index(SearchDocument::from_record(record, branch))),
                None => {
                    debug!(record_id = %record.record_id, "Record has no branch, not indexed");
                    outcome.skipped += 1;
                }
            }
        }
        let deletes: Vec<BulkOp> = ids
            .iter()
            .filter(|id| !found.contains(id))
            .map(|id| BulkOp::delete(id.to_string()))
            .collect();

        if !upserts.is_empty() {
            self.bulk_index(upserts, outcome).await;
        }
        if !deletes.is_empty() {
            self.bulk_delete(deletes, outcome).await;
        }
        Ok(())
    }

    /// Index exactly `ids`, chunked, then refresh.
    async fn sync_records(&self, ids: Vec<Uuid>, operation: &'static str) -> SyncOutcome {
        if ids.is_empty() {
            return SyncOutcome::skipped("no records to index");
        }
        if let Err(outcome) = self.prepare().await {
            return outcome;
        }

        let started = Instant::now();
        let mut outcome = SyncOutcome::new();
        let mut branches = BranchCache::new();
        for chunk in ids.chunks(self.config.chunk_size) {
            if let Err(e) = self.index_chunk(chunk.to_vec(), &mut branches, &mut outcome).await {
                error!(operation, error = %e, "Failed to load records for indexing");
                outcome.record_read_failure(chunk.len(), e);
            }
        }
        self.refresh(&mut outcome).await;

        let outcome = outcome.finish();
        info!(
            operation,
            status = ?outcome.status,
            indexed = outcome.indexed,
            deleted = outcome.deleted,
            failed = outcome.failed,
            skipped = outcome.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index sync finished"
        );
        outcome
    }

    /// Re-index records modified within the trailing window.
    pub async fn incremental_update(&self) -> SyncOutcome {
        let window_ms = self.config.incremental_window.as_millis() as i64;
        let since_ms = chrono::Utc::now().timestamp_millis() - window_ms;

        let ids = match self
            .with_storage(move |s| s.records_modified_since(since_ms))
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "Failed to scan recently modified records");
                return SyncOutcome::failed(e.to_string());
            }
        };
        if ids.is_empty() {
            debug!(window_ms, "No records modified in window");
            return SyncOutcome::skipped("no records modified in window");
        }
        self.sync_records(ids, "incremental_update").await
    }

    /// Re-index every record and delete index documents whose records no
    /// longer exist.
    pub async fn full_resync(&self) -> SyncOutcome {
        if let Err(outcome) = self.prepare().await {
            return outcome;
        }

        let started = Instant::now();
        let chunk_size = self.config.chunk_size;
        let mut outcome = SyncOutcome::new();
        let mut branches = BranchCache::new();
        let mut live: HashSet<String> = HashSet::new();
        let mut after: Option<Uuid> = None;

        loop {
            let cursor = after;
            let page = match self
                .with_storage(move |s| s.record_ids_page(cursor.as_ref(), chunk_size))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    // The live set is incomplete; sweeping now would drop valid documents
                    error!(error = %e, "Record scan failed, aborting full resync");
                    outcome.push_error(format!("record scan: {}", e));
                    self.refresh(&mut outcome).await;
                    return outcome.finish();
                }
            };
            if page.is_empty() {
                break;
            }
            after = page.last().copied();
            live.extend(page.iter().map(Uuid::to_string));

            let page_len = page.len();
            if let Err(e) = self.index_chunk(page, &mut branches, &mut outcome).await {
                error!(error = %e, "Failed to load records for indexing");
                outcome.record_read_failure(page_len, e);
            }
        }
        self.refresh(&mut outcome).await;

        let orphans = self.find_orphans(&live, &mut outcome).await;
        if !orphans.is_empty() {
            info!(count = orphans.len(), "Removing orphaned index documents");
            for chunk in orphans.chunks(chunk_size) {
                let ops = chunk.iter().cloned().map(BulkOp::delete).collect();
                self.bulk_delete(ops, &mut outcome).await;
            }
            self.refresh(&mut outcome).await;
        }

        let outcome = outcome.finish();
        info!(
            status = ?outcome.status,
            records = live.len(),
            indexed = outcome.indexed,
            deleted = outcome.deleted,
            failed = outcome.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full resync finished"
        );
        outcome
    }

    /// Index documents with no record in storage. Records created while
    /// the scan ran are re-checked and kept.
    async fn find_orphans(&self, live: &HashSet<String>, outcome: &mut SyncOutcome) -> Vec<String> {
        let doc_ids = match self.backend.document_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list index documents for orphan sweep");
                outcome.push_error(format!("orphan sweep: {}", e));
                return Vec::new();
            }
        };

        let candidates: Vec<String> = doc_ids.into_iter().filter(|id| !live.contains(id)).collect();
        if candidates.is_empty() {
            return candidates;
        }

        let parsed: Vec<Uuid> = candidates
            .iter()
            .filter_map(|id| Uuid::parse_str(id).ok())
            .collect();
        let present: HashSet<String> = match self.with_storage(move |s| s.get_records(&parsed)).await {
            Ok(records) => records.iter().map(|r| r.record_id.to_string()).collect(),
            Err(e) => {
                warn!(error = %e, "Could not re-check orphan candidates");
                outcome.push_error(format!("orphan sweep: {}", e));
                return Vec::new();
            }
        };
        candidates
            .into_iter()
            .filter(|id| !present.contains(id))
            .collect()
    }

    /// Re-index every record of the branch identified by (name, number).
    pub async fn update_for_branch(&self, name: &str, number: &str) -> SyncOutcome {
        let (name_owned, number_owned) = (name.to_string(), number.to_string());
        let branch = match self
            .with_storage(move |s| s.find_branch(&name_owned, &number_owned))
            .await
        {
            Ok(branch) => branch,
            Err(e) => return SyncOutcome::failed(e.to_string()),
        };
        match branch {
            Some(branch) => self.sync_branch(branch).await,
            None => {
                warn!(branch = name, number, "Unknown branch, nothing to index");
                SyncOutcome::skipped("unknown branch")
            }
        }
    }

    /// Re-index every record of a branch looked up by id.
    pub async fn update_for_branch_id(&self, branch_id: Uuid) -> SyncOutcome {
        match self.with_storage(move |s| s.get_branch(&branch_id)).await {
            Ok(Some(branch)) => self.sync_branch(branch).await,
            Ok(None) => {
                warn!(%branch_id, "Unknown branch, nothing to index");
                SyncOutcome::skipped("unknown branch")
            }
            Err(e) => SyncOutcome::failed(e.to_string()),
        }
    }

    async fn sync_branch(&self, branch: Branch) -> SyncOutcome {
        let branch_id = branch.branch_id;
        let ids = match self
            .with_storage(move |s| s.record_ids_for_branch(&branch_id))
            .await
        {
            Ok(ids) => ids,
            Err(e) => return SyncOutcome::failed(e.to_string()),
        };
        if ids.is_empty() {
            return SyncOutcome::skipped("branch has no records");
        }
        info!(
            branch = %branch.name,
            number = %branch.number,
            records = ids.len(),
            "Re-indexing branch"
        );
        self.sync_records(ids, "update_for_branch").await
    }

    /// Index exactly the given records.
    pub async fn update_records(&self, record_ids: Vec<Uuid>) -> SyncOutcome {
        self.sync_records(record_ids, "update_records").await
    }

    /// Delete the given documents from the index.
    pub async fn remove_records(&self, record_ids: Vec<Uuid>) -> SyncOutcome {
        if record_ids.is_empty() {
            return SyncOutcome::skipped("no records to remove");
        }
        if let Err(outcome) = self.prepare().await {
            return outcome;
        }

        let mut outcome = SyncOutcome::new();
        for chunk in record_ids.chunks(self.config.chunk_size) {
            let ops = chunk.iter().map(|id| BulkOp::delete(id.to_string())).collect();
            self.bulk_delete(ops, &mut outcome).await;
        }
        self.refresh(&mut outcome).await;

        let outcome = outcome.finish();
        info!(
            status = ?outcome.status,
            deleted = outcome.deleted,
            failed = outcome.failed,
            "Removed records from index"
        );
        outcome
    }

    /// Delete the index documents of every record currently stored for a branch.
    pub async fn remove_branch_records(&self, branch_id: Uuid) -> SyncOutcome {
        match self
            .with_storage(move |s| s.record_ids_for_branch(&branch_id))
            .await
        {
            Ok(ids) => self.remove_records(ids).await,
            Err(e) => SyncOutcome::failed(e.to_string()),
        }
    }
}
