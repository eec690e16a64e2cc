//! RocksDB wrapper for the pharmacy system of record.
//!
//! Provides:
//! - Database open with column family setup
//! - Branch and inventory record reads and single-entity writes
//! - Atomic inventory replacement via [`InventoryTransaction`]
//! - Task status store with validated transitions
//! - Durable ingestion queue with leased claims
//! - Change outbox written atomically with the mutation it describes

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, info};
use uuid::Uuid;

use pharma_types::{
    Branch, BranchChange, ChangeEvent, IngestionJob, IngestionTask, InventoryRecord,
};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_BRANCHES, CF_BRANCH_IDENT, CF_CHECKPOINTS, CF_JOBS,
    CF_OUTBOX, CF_RECORDS, CF_RECORDS_BY_BRANCH, CF_RECORDS_BY_TIME, CF_TASKS,
};
use crate::error::StorageError;
use crate::keys::{
    BranchIdentKey, BranchKey, BranchRecordKey, CheckpointKey, JobKey, OutboxKey, RecordKey,
    RecordTimeKey, TaskKey,
};
use crate::transaction::InventoryTransaction;

/// Checkpoint entry holding the next unused outbox sequence
const OUTBOX_HIGH_WATER: &str = "outbox_next";

/// Main storage interface
pub struct Storage {
    db: DB,
    /// Outbox sequence counter for monotonic ordering
    outbox_sequence: AtomicU64,
    /// Serializes sequence allocation with the write that publishes it,
    /// so outbox entries become visible in sequence order
    commit_lock: Mutex<()>,
    /// Serializes queue claims between workers
    queue_lock: Mutex<()>,
    /// One writer lock per branch identity (name, number)
    branch_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let cf_descriptors = build_cf_descriptors();
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        let outbox_sequence = Self::load_outbox_sequence(&db)?;

        Ok(Self {
            db,
            outbox_sequence: AtomicU64::new(outbox_sequence),
            commit_lock: Mutex::new(()),
            queue_lock: Mutex::new(()),
            branch_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Load the next outbox sequence number.
    ///
    /// Consumed entries are deleted, so the highest stored key alone could
    /// hand out a sequence the dispatcher has already passed; the persisted
    /// high-water mark covers an emptied outbox.
    fn load_outbox_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_OUTBOX)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_OUTBOX.to_string()))?;

        let mut next = 0;
        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            next = OutboxKey::from_bytes(&key)?.sequence + 1;
        }

        let checkpoints = db
            .cf_handle(CF_CHECKPOINTS)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_CHECKPOINTS.to_string()))?;
        if let Some(bytes) = db.get_cf(checkpoints, CheckpointKey::new(OUTBOX_HIGH_WATER).to_bytes())? {
            next = next.max(decode_millis(&bytes)? as u64);
        }
        Ok(next)
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Write a batch together with outbox entries for `changes`.
    ///
    /// Returns the sequence numbers assigned to the changes.
    pub(crate) fn write_with_changes(
        &self,
        mut batch: WriteBatch,
        changes: &[ChangeEvent],
    ) -> Result<Vec<u64>, StorageError> {
        let outbox_cf = self.cf(CF_OUTBOX)?;
        let encoded = changes
            .iter()
            .map(|c| c.to_bytes())
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut sequences = Vec::with_capacity(encoded.len());
        for bytes in &encoded {
            let sequence = self.outbox_sequence.fetch_add(1, Ordering::SeqCst);
            batch.put_cf(outbox_cf, OutboxKey::new(sequence).to_bytes(), bytes);
            sequences.push(sequence);
        }
        if let Some(last) = sequences.last() {
            batch.put_cf(
                self.cf(CF_CHECKPOINTS)?,
                CheckpointKey::new(OUTBOX_HIGH_WATER).to_bytes(),
                encode_millis((last + 1) as i64),
            );
        }

        self.db.write(batch)?;
        Ok(sequences)
    }

    /// Start an atomic inventory write. Dropping it without commit discards it.
    pub fn begin_transaction(&self) -> InventoryTransaction<'_> {
        InventoryTransaction::new(self)
    }

    /// Writer lock for one branch identity.
    ///
    /// Must be held from reading a branch's current records until the
    /// write replacing or removing them commits. A `WriteBatch` does not
    /// isolate those reads.
    pub fn branch_lock(&self, name: &str, number: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .branch_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks
            .entry((name.to_string(), number.to_string()))
            .or_default()
            .clone()
    }

    // ==================== Branch Methods ====================

    pub fn get_branch(&self, branch_id: &Uuid) -> Result<Option<Branch>, StorageError> {
        let cf = self.cf(CF_BRANCHES)?;
        match self.db.get_cf(cf, BranchKey::to_bytes(branch_id))? {
            Some(bytes) => Ok(Some(Branch::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Look up a branch by its external identity.
    pub fn find_branch(&self, name: &str, number: &str) -> Result<Option<Branch>, StorageError> {
        let cf = self.cf(CF_BRANCH_IDENT)?;
        let Some(id_bytes) = self.db.get_cf(cf, BranchIdentKey::to_bytes(name, number))? else {
            return Ok(None);
        };
        let id_str = std::str::from_utf8(&id_bytes)
            .map_err(|e| StorageError::Key(format!("Invalid branch id: {}", e)))?;
        let branch_id = Uuid::parse_str(id_str)
            .map_err(|e| StorageError::Key(format!("Invalid branch id: {}", e)))?;
        self.get_branch(&branch_id)
    }

    pub fn list_branches(&self) -> Result<Vec<Branch>, StorageError> {
        let cf = self.cf(CF_BRANCHES)?;
        let mut branches = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            branches.push(Branch::from_bytes(&value)?);
        }
        Ok(branches)
    }

    /// Create or edit a branch outside of ingestion.
    ///
    /// Edits to an existing branch emit a change event so the search index
    /// picks up the new branch fields; a city edit is reported separately.
    pub fn put_branch(&self, branch: &Branch) -> Result<BranchChange, StorageError> {
        let lock = match self.get_branch(&branch.branch_id)? {
            Some(stored) => self.branch_lock(&stored.name, &stored.number),
            None => self.branch_lock(&branch.name, &branch.number),
        };
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.get_branch(&branch.branch_id)?;
        let change = BranchChange::between(previous.as_ref(), branch);

        let mut tx = self.begin_transaction();
        if let Some(prev) = &previous {
            if prev.name != branch.name || prev.number != branch.number {
                tx.remove_branch_ident(prev)?;
            }
        }
        tx.put_branch(branch)?;
        match change {
            BranchChange::Created => {}
            BranchChange::CityChanged => tx.stage_change(ChangeEvent::branch_city_changed(
                branch.branch_id,
                &branch.name,
                &branch.number,
            )),
            BranchChange::Updated => tx.stage_change(ChangeEvent::branch_updated(
                branch.branch_id,
                &branch.name,
                &branch.number,
            )),
        }
        tx.commit()?;

        debug!(branch_id = %branch.branch_id, ?change, "Stored branch");
        Ok(change)
    }

    /// Delete a branch and cascade to its records.
    ///
    /// The ids of the removed records are captured in the change event
    /// before they disappear. Returns the number of records removed.
    pub fn delete_branch(&self, branch_id: &Uuid) -> Result<usize, StorageError> {
        let branch = self
            .get_branch(branch_id)?
            .ok_or_else(|| StorageError::NotFound(format!("branch {}", branch_id)))?;
        let lock = self.branch_lock(&branch.name, &branch.number);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut tx = self.begin_transaction();
        let removed = tx.stage_remove_branch_records(branch_id)?;
        tx.remove_branch(&branch)?;
        tx.stage_change(ChangeEvent::branch_deleted(*branch_id, removed.clone()));
        tx.commit()?;

        info!(branch_id = %branch_id, records = removed.len(), "Deleted branch");
        Ok(removed.len())
    }

    // ==================== Record Methods ====================

    pub fn get_record(&self, record_id: &Uuid) -> Result<Option<InventoryRecord>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        match self.db.get_cf(cf, RecordKey::to_bytes(record_id))? {
            Some(bytes) => Ok(Some(InventoryRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch the records that still exist among `record_ids`, in input order.
    pub fn get_records(&self, record_ids: &[Uuid]) -> Result<Vec<InventoryRecord>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let keys: Vec<Vec<u8>> = record_ids.iter().map(RecordKey::to_bytes).collect();
        let mut records = Vec::with_capacity(record_ids.len());
        for result in self.db.multi_get_cf(keys.iter().map(|k| (cf, k.as_slice()))) {
            if let Some(bytes) = result? {
                records.push(InventoryRecord::from_bytes(&bytes)?);
            }
        }
        Ok(records)
    }

    /// Branch index entries: (record id, updated_at ms)
    pub(crate) fn branch_index_entries(
        &self,
        branch_id: &Uuid,
    ) -> Result<Vec<(Uuid, i64)>, StorageError> {
        let cf = self.cf(CF_RECORDS_BY_BRANCH)?;
        let prefix = BranchRecordKey::prefix(branch_id);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let index_key = BranchRecordKey::from_bytes(&key)?;
            entries.push((index_key.record_id, decode_millis(&value)?));
        }
        Ok(entries)
    }

    pub fn record_ids_for_branch(&self, branch_id: &Uuid) -> Result<Vec<Uuid>, StorageError> {
        Ok(self
            .branch_index_entries(branch_id)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Ids of records modified at or after `since_ms`, oldest first.
    pub fn records_modified_since(&self, since_ms: i64) -> Result<Vec<Uuid>, StorageError> {
        let cf = self.cf(CF_RECORDS_BY_TIME)?;
        let start = RecordTimeKey::prefix_start(since_ms);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            ids.push(RecordTimeKey::from_bytes(&key)?.record_id);
        }
        Ok(ids)
    }

    /// One page of record ids in key order, starting after `after`.
    pub fn record_ids_page(
        &self,
        after: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<Uuid>, StorageError> {
        let cf = self.cf(CF_RECORDS)?;
        let start = after.map(RecordKey::to_bytes);
        let mode = match &start {
            Some(key) => IteratorMode::From(key, Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut ids = Vec::with_capacity(limit);
        for item in self.db.iterator_cf(cf, mode) {
            if ids.len() >= limit {
                break;
            }
            let (key, _) = item?;
            if start.as_deref() == Some(&key[..]) {
                continue;
            }
            ids.push(RecordKey::from_bytes(&key)?);
        }
        Ok(ids)
    }

    /// Insert or replace one record outside of ingestion.
    pub fn upsert_record(&self, record: &InventoryRecord) -> Result<(), StorageError> {
        let mut tx = self.begin_transaction();
        if let Some(previous) = self.get_record(&record.record_id)? {
            tx.remove_record(&previous)?;
        }
        tx.stage_records(std::slice::from_ref(record))?;
        tx.stage_change(ChangeEvent::records_upserted(vec![record.record_id]));
        tx.commit()
    }

    /// Delete one record. Returns false if it did not exist.
    pub fn delete_record(&self, record_id: &Uuid) -> Result<bool, StorageError> {
        let Some(record) = self.get_record(record_id)? else {
            return Ok(false);
        };
        let mut tx = self.begin_transaction();
        tx.remove_record(&record)?;
        tx.stage_change(ChangeEvent::records_deleted(vec![*record_id]));
        tx.commit()?;
        Ok(true)
    }

    // ==================== Task Status Methods ====================

    pub fn create_task(&self, task: &IngestionTask) -> Result<(), StorageError> {
        let cf = self.cf(CF_TASKS)?;
        self.db
            .put_cf(cf, TaskKey::to_bytes(&task.task_id), task.to_bytes()?)?;
        debug!(task_id = %task.task_id, status = %task.status, "Created task");
        Ok(())
    }

    /// Create a pending task and queue its job in one write.
    pub fn enqueue_ingestion(
        &self,
        task: &IngestionTask,
        job: &IngestionJob,
    ) -> Result<(), StorageError> {
        let tasks_cf = self.cf(CF_TASKS)?;
        let jobs_cf = self.cf(CF_JOBS)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(tasks_cf, TaskKey::to_bytes(&task.task_id), task.to_bytes()?);
        batch.put_cf(
            jobs_cf,
            JobKey::new(job.not_before_ms, &job.task_id).to_bytes(),
            job.to_bytes()?,
        );
        self.db.write(batch)?;

        info!(task_id = %task.task_id, branch = %task.branch_slug, "Queued ingestion");
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<IngestionTask>, StorageError> {
        let cf = self.cf(CF_TASKS)?;
        match self.db.get_cf(cf, TaskKey::to_bytes(task_id))? {
            Some(bytes) => Ok(Some(IngestionTask::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a task update, rejecting changes the state machine forbids.
    ///
    /// Stored terminal tasks are never overwritten.
    pub fn update_task(&self, task: &IngestionTask) -> Result<(), StorageError> {
        let stored = self
            .get_task(&task.task_id)?
            .ok_or_else(|| StorageError::NotFound(format!("task {}", task.task_id)))?;

        let allowed = !stored.status.is_terminal()
            && (stored.status == task.status || stored.status.can_transition_to(task.status));
        if !allowed {
            return Err(StorageError::InvalidTransition {
                task_id: task.task_id.clone(),
                from: stored.status,
                to: task.status,
            });
        }

        let cf = self.cf(CF_TASKS)?;
        self.db
            .put_cf(cf, TaskKey::to_bytes(&task.task_id), task.to_bytes()?)?;
        debug!(task_id = %task.task_id, status = %task.status, "Updated task");
        Ok(())
    }

    /// Most recent tasks first.
    pub fn list_tasks(&self, limit: usize) -> Result<Vec<IngestionTask>, StorageError> {
        let cf = self.cf(CF_TASKS)?;
        let mut tasks = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::End).take(limit) {
            let (_, value) = item?;
            tasks.push(IngestionTask::from_bytes(&value)?);
        }
        Ok(tasks)
    }

    // ==================== Job Queue Methods ====================

    pub fn enqueue_job(&self, job: &IngestionJob) -> Result<(), StorageError> {
        let cf = self.cf(CF_JOBS)?;
        self.db.put_cf(
            cf,
            JobKey::new(job.not_before_ms, &job.task_id).to_bytes(),
            job.to_bytes()?,
        )?;
        Ok(())
    }

    /// Claim up to `limit` jobs that are ready at `now_ms`.
    ///
    /// A claimed job stays in the queue with its ready time pushed out by
    /// `lease_ms`, so a worker that dies mid-attempt does not lose it. The
    /// returned jobs carry the leased ready time; pass them back unchanged
    /// to [`Storage::finish_job`] or [`Storage::reschedule_job`].
    pub fn claim_ready_jobs(
        &self,
        now_ms: i64,
        lease_ms: i64,
        limit: usize,
    ) -> Result<Vec<IngestionJob>, StorageError> {
        let cf = self.cf(CF_JOBS)?;
        let _guard = self.queue_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut batch = WriteBatch::default();
        let mut claimed = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            if claimed.len() >= limit {
                break;
            }
            let (key, value) = item?;
            if JobKey::from_bytes(&key)?.not_before_ms > now_ms {
                break;
            }
            let mut job = IngestionJob::from_bytes(&value)?;
            job.not_before_ms = now_ms + lease_ms;
            batch.delete_cf(cf, &key);
            batch.put_cf(
                cf,
                JobKey::new(job.not_before_ms, &job.task_id).to_bytes(),
                job.to_bytes()?,
            );
            claimed.push(job);
        }

        if !claimed.is_empty() {
            self.db.write(batch)?;
            debug!(count = claimed.len(), "Claimed ingestion jobs");
        }
        Ok(claimed)
    }

    /// Replace a claimed job with its next attempt.
    pub fn reschedule_job(
        &self,
        current: &IngestionJob,
        next: &IngestionJob,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_JOBS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(
            cf,
            JobKey::new(current.not_before_ms, &current.task_id).to_bytes(),
        );
        batch.put_cf(
            cf,
            JobKey::new(next.not_before_ms, &next.task_id).to_bytes(),
            next.to_bytes()?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    /// Remove a claimed job from the queue.
    pub fn finish_job(&self, job: &IngestionJob) -> Result<(), StorageError> {
        let cf = self.cf(CF_JOBS)?;
        self.db
            .delete_cf(cf, JobKey::new(job.not_before_ms, &job.task_id).to_bytes())?;
        Ok(())
    }

    // ==================== Outbox Methods ====================

    /// Append a standalone change event. Returns its sequence number.
    pub fn append_change(&self, event: &ChangeEvent) -> Result<u64, StorageError> {
        let sequences = self.write_with_changes(WriteBatch::default(), std::slice::from_ref(event))?;
        sequences
            .first()
            .copied()
            .ok_or_else(|| StorageError::Key("no outbox sequence assigned".to_string()))
    }

    /// Get outbox entries starting from a sequence number, in sequence order.
    pub fn get_outbox_entries(
        &self,
        start_sequence: u64,
        limit: usize,
    ) -> Result<Vec<(u64, ChangeEvent)>, StorageError> {
        let cf = self.cf(CF_OUTBOX)?;
        let start_key = OutboxKey::new(start_sequence).to_bytes();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));

        let mut results = Vec::new();
        for item in iter.take(limit) {
            let (key, value) = item?;
            let outbox_key = OutboxKey::from_bytes(&key)?;
            results.push((outbox_key.sequence, ChangeEvent::from_bytes(&value)?));
        }
        Ok(results)
    }

    /// Delete outbox entries up to and including a sequence number.
    pub fn delete_outbox_entries(&self, up_to_sequence: u64) -> Result<usize, StorageError> {
        let cf = self.cf(CF_OUTBOX)?;
        let mut batch = WriteBatch::default();
        let mut count = 0;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if OutboxKey::from_bytes(&key)?.sequence > up_to_sequence {
                break;
            }
            batch.delete_cf(cf, &key);
            count += 1;
        }

        if count > 0 {
            self.db.write(batch)?;
            debug!(count, up_to_sequence, "Deleted outbox entries");
        }
        Ok(count)
    }

    // ==================== Checkpoint Methods ====================

    pub fn put_checkpoint(&self, job_name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        self.db
            .put_cf(cf, CheckpointKey::new(job_name).to_bytes(), bytes)?;
        Ok(())
    }

    pub fn get_checkpoint(&self, job_name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_CHECKPOINTS)?;
        Ok(self
            .db
            .get_cf(cf, CheckpointKey::new(job_name).to_bytes())?)
    }

    // ==================== Admin Methods ====================

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            self.db.flush_cf(self.cf(cf_name)?)?;
        }
        Ok(())
    }

    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            branch_count: self.count_cf_entries(CF_BRANCHES)?,
            record_count: self.count_cf_entries(CF_RECORDS)?,
            task_count: self.count_cf_entries(CF_TASKS)?,
            queued_job_count: self.count_cf_entries(CF_JOBS)?,
            outbox_count: self.count_cf_entries(CF_OUTBOX)?,
        })
    }

    fn count_cf_entries(&self, cf_name: &str) -> Result<u64, StorageError> {
        let cf = self.cf(cf_name)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

pub(crate) fn encode_millis(ms: i64) -> [u8; 8] {
    ms.to_be_bytes()
}

fn decode_millis(bytes: &[u8]) -> Result<i64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StorageError::Key(format!("Invalid timestamp value ({} bytes)", bytes.len())))?;
    Ok(i64::from_be_bytes(array))
}

/// Statistics about the storage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub branch_count: u64,
    pub record_count: u64,
    pub task_count: u64,
    pub queued_job_count: u64,
    /// Change events not yet cleaned up by the dispatcher
    pub outbox_count: u64,
}
