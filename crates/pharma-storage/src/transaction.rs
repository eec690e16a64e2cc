//! Staged inventory writes committed as one RocksDB batch.
//!
//! Record rows, both secondary indexes and the outbox entries describing
//! the change land together or not at all.

use rocksdb::WriteBatch;
use tracing::debug;
use uuid::Uuid;

use pharma_types::{Branch, ChangeEvent, InventoryRecord};

use crate::column_families::{
    CF_BRANCHES, CF_BRANCH_IDENT, CF_RECORDS, CF_RECORDS_BY_BRANCH, CF_RECORDS_BY_TIME,
};
use crate::db::{encode_millis, Storage};
use crate::error::StorageError;
use crate::keys::{BranchIdentKey, BranchKey, BranchRecordKey, RecordKey, RecordTimeKey};

/// An uncommitted inventory write. Dropping it discards every staged change.
pub struct InventoryTransaction<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    changes: Vec<ChangeEvent>,
    staged_records: usize,
    removed_records: usize,
}

impl<'a> InventoryTransaction<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch: WriteBatch::default(),
            changes: Vec::new(),
            staged_records: 0,
            removed_records: 0,
        }
    }

    /// Stage a branch row and its identity lookup.
    pub fn put_branch(&mut self, branch: &Branch) -> Result<(), StorageError> {
        let branches_cf = self.storage.cf(CF_BRANCHES)?;
        let ident_cf = self.storage.cf(CF_BRANCH_IDENT)?;
        self.batch.put_cf(
            branches_cf,
            BranchKey::to_bytes(&branch.branch_id),
            branch.to_bytes()?,
        );
        self.batch.put_cf(
            ident_cf,
            BranchIdentKey::to_bytes(&branch.name, &branch.number),
            branch.branch_id.to_string(),
        );
        Ok(())
    }

    pub(crate) fn remove_branch_ident(&mut self, branch: &Branch) -> Result<(), StorageError> {
        let ident_cf = self.storage.cf(CF_BRANCH_IDENT)?;
        self.batch
            .delete_cf(ident_cf, BranchIdentKey::to_bytes(&branch.name, &branch.number));
        Ok(())
    }

    pub(crate) fn remove_branch(&mut self, branch: &Branch) -> Result<(), StorageError> {
        let branches_cf = self.storage.cf(CF_BRANCHES)?;
        self.batch
            .delete_cf(branches_cf, BranchKey::to_bytes(&branch.branch_id));
        self.remove_branch_ident(branch)
    }

    /// Stage removal of every record currently stored for a branch.
    ///
    /// Returns the ids of the removed records.
    pub fn stage_remove_branch_records(
        &mut self,
        branch_id: &Uuid,
    ) -> Result<Vec<Uuid>, StorageError> {
        let records_cf = self.storage.cf(CF_RECORDS)?;
        let by_branch_cf = self.storage.cf(CF_RECORDS_BY_BRANCH)?;
        let by_time_cf = self.storage.cf(CF_RECORDS_BY_TIME)?;

        let entries = self.storage.branch_index_entries(branch_id)?;
        let mut removed = Vec::with_capacity(entries.len());
        for (record_id, updated_ms) in entries {
            self.batch
                .delete_cf(records_cf, RecordKey::to_bytes(&record_id));
            self.batch.delete_cf(
                by_branch_cf,
                BranchRecordKey::new(*branch_id, record_id).to_bytes(),
            );
            self.batch.delete_cf(
                by_time_cf,
                RecordTimeKey::new(updated_ms, record_id).to_bytes(),
            );
            removed.push(record_id);
        }
        self.removed_records += removed.len();
        Ok(removed)
    }

    /// Stage removal of a single record and its index entries.
    pub fn remove_record(&mut self, record: &InventoryRecord) -> Result<(), StorageError> {
        let records_cf = self.storage.cf(CF_RECORDS)?;
        let by_branch_cf = self.storage.cf(CF_RECORDS_BY_BRANCH)?;
        let by_time_cf = self.storage.cf(CF_RECORDS_BY_TIME)?;

        self.batch
            .delete_cf(records_cf, RecordKey::to_bytes(&record.record_id));
        self.batch.delete_cf(
            by_branch_cf,
            BranchRecordKey::new(record.branch_id, record.record_id).to_bytes(),
        );
        self.batch.delete_cf(
            by_time_cf,
            RecordTimeKey::new(record.updated_at.timestamp_millis(), record.record_id).to_bytes(),
        );
        self.removed_records += 1;
        Ok(())
    }

    /// Stage new record rows with their branch and time index entries.
    pub fn stage_records(&mut self, records: &[InventoryRecord]) -> Result<(), StorageError> {
        let records_cf = self.storage.cf(CF_RECORDS)?;
        let by_branch_cf = self.storage.cf(CF_RECORDS_BY_BRANCH)?;
        let by_time_cf = self.storage.cf(CF_RECORDS_BY_TIME)?;

        for record in records {
            let updated_ms = record.updated_at.timestamp_millis();
            self.batch.put_cf(
                records_cf,
                RecordKey::to_bytes(&record.record_id),
                record.to_bytes()?,
            );
            self.batch.put_cf(
                by_branch_cf,
                BranchRecordKey::new(record.branch_id, record.record_id).to_bytes(),
                encode_millis(updated_ms),
            );
            self.batch.put_cf(
                by_time_cf,
                RecordTimeKey::new(updated_ms, record.record_id).to_bytes(),
                b"",
            );
        }
        self.staged_records += records.len();
        Ok(())
    }

    /// Stage an outbox entry; its sequence is assigned at commit.
    pub fn stage_change(&mut self, event: ChangeEvent) {
        self.changes.push(event);
    }

    pub fn staged_records(&self) -> usize {
        self.staged_records
    }

    pub fn removed_records(&self) -> usize {
        self.removed_records
    }

    /// Apply every staged change atomically.
    pub fn commit(self) -> Result<(), StorageError> {
        let staged = self.staged_records;
        let removed = self.removed_records;
        let sequences = self.storage.write_with_changes(self.batch, &self.changes)?;
        debug!(
            staged,
            removed,
            changes = sequences.len(),
            "Committed inventory transaction"
        );
        Ok(())
    }

    /// Discard staged changes explicitly.
    pub fn rollback(self) {
        debug!(
            staged = self.staged_records,
            removed = self.removed_records,
            "Rolled back inventory transaction"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use pharma_types::{ChangeKind, RecordDraft};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn record(branch_id: Uuid, name: &str) -> InventoryRecord {
        let draft = RecordDraft {
            name: name.to_string(),
            form: "-".to_string(),
            manufacturer: String::new(),
            country: String::new(),
            serial: "A1".to_string(),
            price: 3.0,
            quantity: 2.0,
            total_price: 6.0,
            expiry_date: NaiveDate::from_ymd_opt(2027, 5, 1).unwrap(),
            category: "Other".to_string(),
            import_date: NaiveDate::from_ymd_opt(2025, 5, 1).unwrap(),
            internal_code: String::new(),
            wholesale_price: 0.0,
            retail_price: 0.0,
            distributor: String::new(),
            internal_id: String::new(),
        };
        InventoryRecord::from_draft(draft, branch_id, Utc::now())
    }

    #[test]
    fn test_replace_swaps_snapshot_atomically() {
        let (storage, _temp) = create_test_storage();
        let branch = Branch::new("Эклиния", "3");

        let first = vec![record(branch.branch_id, "Old A"), record(branch.branch_id, "Old B")];
        let mut tx = storage.begin_transaction();
        tx.put_branch(&branch).unwrap();
        tx.stage_records(&first).unwrap();
        tx.commit().unwrap();

        let second = vec![record(branch.branch_id, "New")];
        let mut tx = storage.begin_transaction();
        let removed = tx.stage_remove_branch_records(&branch.branch_id).unwrap();
        tx.stage_records(&second).unwrap();
        tx.stage_change(ChangeEvent::records_deleted(removed.clone()));
        tx.stage_change(ChangeEvent::records_upserted(vec![second[0].record_id]));
        assert_eq!(tx.removed_records(), 2);
        assert_eq!(tx.staged_records(), 1);
        tx.commit().unwrap();

        assert_eq!(removed.len(), 2);
        let ids = storage.record_ids_for_branch(&branch.branch_id).unwrap();
        assert_eq!(ids, vec![second[0].record_id]);
        assert_eq!(storage.records_modified_since(0).unwrap().len(), 1);

        let kinds: Vec<_> = storage
            .get_outbox_entries(0, 10)
            .unwrap()
            .into_iter()
            .map(|(_, e)| e.kind)
            .collect();
        assert_eq!(kinds, vec![ChangeKind::RecordsDeleted, ChangeKind::RecordsUpserted]);
    }

    #[test]
    fn test_dropped_transaction_writes_nothing() {
        let (storage, _temp) = create_test_storage();
        let branch = Branch::new("Эклиния", "3");
        {
            let mut tx = storage.begin_transaction();
            tx.put_branch(&branch).unwrap();
            tx.stage_records(&[record(branch.branch_id, "Never")]).unwrap();
            tx.stage_change(ChangeEvent::records_upserted(vec![]));
        }
        let mut tx = storage.begin_transaction();
        tx.put_branch(&branch).unwrap();
        tx.rollback();

        assert!(storage.find_branch("Эклиния", "3").unwrap().is_none());
        assert!(storage.records_modified_since(0).unwrap().is_empty());
        assert!(storage.get_outbox_entries(0, 10).unwrap().is_empty());
    }
}
