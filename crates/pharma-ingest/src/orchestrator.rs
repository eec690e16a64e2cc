//! Ingestion orchestrator.
//!
//! One attempt replaces a branch's whole inventory with the rows of an
//! uploaded CSV snapshot. Branch upsert, removal of the previous snapshot,
//! the new records and the outbox events for the index are staged into a
//! single [`InventoryTransaction`] and land together or not at all.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use chrono::Utc;
use csv::ReaderBuilder;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pharma_indexing::ChangeNotifier;
use pharma_storage::{InventoryTransaction, Storage, StorageError};
use pharma_types::{
    Branch, ChangeEvent, IngestSettings, IngestionJob, IngestionSummary, IngestionTask,
    InventoryRecord, NEW_BRANCH_CITY,
};

use crate::encoding::decode_upload;
use crate::error::IngestError;
use crate::parser::{parse_row, RowError};
use crate::retry::AttemptOutcome;

/// Accepts uploads and runs ingestion attempts.
#[derive(Clone)]
pub struct IngestionOrchestrator {
    storage: Arc<Storage>,
    settings: Arc<IngestSettings>,
    notifier: Option<ChangeNotifier>,
}

impl IngestionOrchestrator {
    pub fn new(storage: Arc<Storage>, settings: IngestSettings) -> Self {
        Self {
            storage,
            settings: Arc::new(settings),
            notifier: None,
        }
    }

    /// Wake the change dispatcher after every committed ingestion.
    pub fn with_notifier(mut self, notifier: ChangeNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    /// Validate an upload, decode it and queue it for processing.
    ///
    /// Returns the id of the new pending task. Rejected uploads create no
    /// task.
    pub async fn submit_upload(
        &self,
        branch_slug: &str,
        branch_number: &str,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<String, IngestError> {
        let filename =
            filename.ok_or_else(|| IngestError::Validation("No file uploaded".to_string()))?;
        if !filename.to_lowercase().ends_with(".csv") {
            return Err(IngestError::Validation(
                "Only CSV files allowed".to_string(),
            ));
        }
        let branch_number = branch_number.trim();
        if branch_number.is_empty() {
            return Err(IngestError::Validation(
                "Branch number is required".to_string(),
            ));
        }
        if self.settings.resolve_branch(branch_slug).is_none() {
            return Err(IngestError::UnknownBranch(branch_slug.to_string()));
        }

        let decoded = decode_upload(bytes);
        if decoded.had_errors {
            warn!(
                filename,
                encoding = decoded.encoding,
                "Upload contained invalid byte sequences"
            );
        }

        let task = IngestionTask::new(branch_slug, branch_number, self.settings.max_attempts());
        let job = IngestionJob::new(&task.task_id, branch_slug, branch_number, decoded.text)
            .with_encoding(decoded.encoding);
        let task_id = task.task_id.clone();

        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || storage.enqueue_ingestion(&task, &job)).await??;

        info!(
            task_id = %task_id,
            branch = branch_slug,
            number = branch_number,
            filename,
            bytes = bytes.len(),
            "Accepted upload"
        );
        Ok(task_id)
    }

    /// Run one ingestion attempt on a blocking thread.
    pub async fn ingest(
        &self,
        branch_slug: &str,
        branch_number: &str,
        csv_text: String,
    ) -> AttemptOutcome {
        let this = self.clone();
        let slug = branch_slug.to_string();
        let number = branch_number.to_string();
        match tokio::task::spawn_blocking(move || this.ingest_blocking(&slug, &number, &csv_text))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => AttemptOutcome::Retryable(e.into()),
        }
    }

    /// Run one ingestion attempt on the current thread.
    pub fn ingest_blocking(
        &self,
        branch_slug: &str,
        branch_number: &str,
        csv_text: &str,
    ) -> AttemptOutcome {
        let Some(name) = self.settings.resolve_branch(branch_slug) else {
            warn!(branch = branch_slug, "Rejected ingestion for unknown branch");
            return AttemptOutcome::Fatal(IngestError::UnknownBranch(branch_slug.to_string()));
        };
        let number = branch_number.trim();

        match self.replace_inventory(name, number, csv_text) {
            Ok(summary) => {
                if let Some(notifier) = &self.notifier {
                    notifier.notify();
                }
                AttemptOutcome::Completed(summary)
            }
            Err(e) => {
                error!(
                    critical = true,
                    branch = name,
                    number,
                    error = %e,
                    "Inventory replacement failed, nothing was written"
                );
                AttemptOutcome::Retryable(e)
            }
        }
    }

    fn replace_inventory(
        &self,
        name: &str,
        number: &str,
        csv_text: &str,
    ) -> Result<IngestionSummary, IngestError> {
        let started = Instant::now();

        // Held until commit: the old record ids read below must still be
        // the branch's records when the batch lands.
        let lock = self.storage.branch_lock(name, number);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (branch, branch_changed) = match self.storage.find_branch(name, number)? {
            Some(branch) if branch.city.as_deref().is_some_and(|c| !c.is_empty()) => {
                (branch, false)
            }
            Some(mut branch) => {
                branch.city = Some(NEW_BRANCH_CITY.to_string());
                branch.updated_at = Utc::now();
                (branch, true)
            }
            None => (Branch::new(name, number).with_city(NEW_BRANCH_CITY), true),
        };

        let mut txn = self.storage.begin_transaction();
        if branch_changed {
            txn.put_branch(&branch)?;
        }

        let removed = txn.stage_remove_branch_records(&branch.branch_id)?;
        let mut summary = IngestionSummary {
            removed: removed.len(),
            ..Default::default()
        };
        if !removed.is_empty() {
            txn.stage_change(ChangeEvent::records_deleted(removed));
        }

        let batch_size = self.settings.batch_size.max(1);
        let updated_at = Utc::now();
        let mut seen = HashSet::new();
        let mut batch: Vec<InventoryRecord> = Vec::with_capacity(batch_size.min(1024));
        let mut inserted: Vec<Uuid> = Vec::new();

        let mut reader = ReaderBuilder::new()
            .delimiter(b';')
            .has_headers(false)
            .flexible(true)
            .from_reader(csv_text.as_bytes());

        for (index, result) in reader.records().enumerate() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    summary.rows_processed += 1;
                    self.record_row_error(
                        &mut summary,
                        RowError::new::<&str>(index + 1, format!("Malformed CSV: {}", e), &[]),
                    );
                    continue;
                }
            };
            let row = record
                .position()
                .map_or(index + 1, |position| position.line() as usize);
            let columns: Vec<&str> = record.iter().collect();

            match parse_row(row, &columns) {
                Ok(None) => continue,
                Ok(Some(draft)) => {
                    summary.rows_processed += 1;
                    if !seen.insert(draft.dedup_key()) {
                        summary.duplicates += 1;
                        continue;
                    }
                    batch.push(InventoryRecord::from_draft(draft, branch.branch_id, updated_at));
                    if batch.len() >= batch_size {
                        flush_batch(&mut txn, &mut batch, &mut inserted)?;
                    }
                }
                Err(row_error) => {
                    summary.rows_processed += 1;
                    self.record_row_error(&mut summary, row_error);
                }
            }
        }
        flush_batch(&mut txn, &mut batch, &mut inserted)?;

        summary.created = inserted.len();
        if !inserted.is_empty() {
            txn.stage_change(ChangeEvent::records_upserted(inserted));
        }
        txn.commit()?;

        info!(
            branch = name,
            number,
            branch_id = %branch.branch_id,
            rows = summary.rows_processed,
            created = summary.created,
            removed = summary.removed,
            errors = summary.errors,
            duplicates = summary.duplicates,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Replaced branch inventory"
        );
        Ok(summary)
    }

    fn record_row_error(&self, summary: &mut IngestionSummary, row_error: RowError) {
        warn!(row = row_error.row, error = %row_error.message, "Skipping row");
        summary.errors += 1;
        if summary.error_details.len() < self.settings.error_sample_limit {
            summary.error_details.push(row_error.detail());
        }
    }
}

fn flush_batch(
    txn: &mut InventoryTransaction<'_>,
    batch: &mut Vec<InventoryRecord>,
    inserted: &mut Vec<Uuid>,
) -> Result<(), StorageError> {
    if batch.is_empty() {
        return Ok(());
    }
    txn.stage_records(batch)?;
    inserted.extend(batch.iter().map(|record| record.record_id));
    debug!(batch = batch.len(), total = inserted.len(), "Staged record batch");
    batch.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharma_types::{ChangeKind, TaskStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (IngestionOrchestrator, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        (
            IngestionOrchestrator::new(storage, IngestSettings::default()),
            temp,
        )
    }

    fn row(name: &str, serial: &str, expiry: &str) -> String {
        format!(
            "{};Bayer;Germany;{};10,50;2;;{};Лексредства;15.01.2024;C-1;9,00;10,50;Dist;1;12",
            name, serial, expiry
        )
    }

    fn completed(outcome: AttemptOutcome) -> IngestionSummary {
        match outcome {
            AttemptOutcome::Completed(summary) => summary,
            other => panic!("expected completed attempt, got {:?}", other),
        }
    }

    fn branch_records(orchestrator: &IngestionOrchestrator) -> Vec<InventoryRecord> {
        let storage = orchestrator.storage();
        let branch = storage.find_branch("Новамедика", "12").unwrap().unwrap();
        let ids = storage.record_ids_for_branch(&branch.branch_id).unwrap();
        storage.get_records(&ids).unwrap()
    }

    #[test]
    fn test_three_rows_one_duplicate() {
        let (orchestrator, _temp) = setup();
        let csv = [
            row("Аспирин ТАБЛ. 500мг", "AB-1", "31.12.2025"),
            row("Нурофен капс. 200мг", "NF-2", "01.06.2026"),
            row("Аспирин ТАБЛ. 500мг", "AB-1", "31.12.2025"),
        ]
        .join("\n");

        let summary = completed(orchestrator.ingest_blocking("novamedika", "12", &csv));
        assert_eq!(summary.created, 2);
        assert_eq!(summary.errors, 0);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rows_processed, 3);

        let mut names: Vec<String> = branch_records(&orchestrator)
            .into_iter()
            .map(|r| format!("{} | {}", r.name, r.form))
            .collect();
        names.sort();
        assert_eq!(names, vec!["Аспирин | ТАБЛ. 500мг", "Нурофен | капс. 200мг"]);
    }

    #[test]
    fn test_empty_csv_clears_inventory() {
        let (orchestrator, _temp) = setup();
        let csv = [row("A", "1", "01.01.2030"), row("B", "2", "01.01.2030")].join("\n");
        completed(orchestrator.ingest_blocking("novamedika", "12", &csv));

        let summary = completed(orchestrator.ingest_blocking("novamedika", "12", ""));
        assert_eq!(summary.created, 0);
        assert_eq!(summary.removed, 2);
        assert!(branch_records(&orchestrator).is_empty());
    }

    #[test]
    fn test_reupload_replaces_records() {
        let (orchestrator, _temp) = setup();
        completed(orchestrator.ingest_blocking("novamedika", "12", &row("A", "1", "01.01.2030")));
        let first = branch_records(&orchestrator);

        completed(orchestrator.ingest_blocking("novamedika", "12", &row("A", "1", "01.01.2030")));
        let second = branch_records(&orchestrator);

        assert_eq!(second.len(), 1);
        assert_ne!(first[0].record_id, second[0].record_id);
        assert!(orchestrator.storage().get_record(&first[0].record_id).unwrap().is_none());
    }

    #[test]
    fn test_bad_date_sampled_and_blank_row_skipped() {
        let (orchestrator, _temp) = setup();
        let csv = [
            row("A", "1", "01.01.2030"),
            ";;;;;;;;;;;;;;;".to_string(),
            row("B", "2", "31/02/2024"),
        ]
        .join("\n");

        let summary = completed(orchestrator.ingest_blocking("novamedika", "12", &csv));
        assert_eq!(summary.created, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.rows_processed, 2);
        assert_eq!(summary.error_details.len(), 1);
        assert!(summary.error_details[0].contains("31/02/2024"));
        assert!(summary.error_details[0].starts_with("Row error: "));
    }

    #[test]
    fn test_error_sample_is_capped() {
        let (orchestrator, _temp) = setup();
        let csv = (0..12)
            .map(|i| row(&format!("P{}", i), "S", "bad"))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = completed(orchestrator.ingest_blocking("novamedika", "12", &csv));
        assert_eq!(summary.errors, 12);
        assert_eq!(summary.error_details.len(), 10);
        assert_eq!(summary.created, 0);
    }

    #[test]
    fn test_batches_flush_into_one_commit() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let settings = IngestSettings {
            batch_size: 2,
            ..Default::default()
        };
        let orchestrator = IngestionOrchestrator::new(storage, settings);
        let csv = (0..5)
            .map(|i| row(&format!("P{}", i), &format!("S{}", i), "01.01.2030"))
            .collect::<Vec<_>>()
            .join("\n");

        let summary = completed(orchestrator.ingest_blocking("novamedika", "12", &csv));
        assert_eq!(summary.created, 5);
        assert_eq!(branch_records(&orchestrator).len(), 5);
    }

    #[test]
    fn test_concurrent_uploads_to_one_branch_do_not_mix() {
        let (orchestrator, _temp) = setup();
        let file = |prefix: &str| {
            (0..3_000)
                .map(|i| row(&format!("{}{}", prefix, i), &format!("{}-{}", prefix, i), "01.01.2030"))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let (first, second) = (file("A"), file("B"));

        std::thread::scope(|scope| {
            let a = scope.spawn(|| orchestrator.ingest_blocking("novamedika", "12", &first));
            let b = scope.spawn(|| orchestrator.ingest_blocking("novamedika", "12", &second));
            completed(a.join().unwrap());
            completed(b.join().unwrap());
        });

        let storage = orchestrator.storage();
        assert_eq!(storage.list_branches().unwrap().len(), 1);
        assert_eq!(storage.get_stats().unwrap().record_count, 3_000);

        let records = branch_records(&orchestrator);
        assert_eq!(records.len(), 3_000);
        let prefix = &records[0].name[..1];
        assert!(records.iter().all(|r| r.name.starts_with(prefix)));
    }

    #[test]
    fn test_unknown_branch_is_fatal_and_writes_nothing() {
        let (orchestrator, _temp) = setup();
        let outcome = orchestrator.ingest_blocking("apteka", "1", &row("A", "1", "01.01.2030"));
        assert!(matches!(
            outcome,
            AttemptOutcome::Fatal(IngestError::UnknownBranch(_))
        ));
        assert!(orchestrator.storage().list_branches().unwrap().is_empty());
        assert_eq!(orchestrator.storage().get_stats().unwrap().outbox_count, 0);
    }

    #[test]
    fn test_new_branch_gets_placeholder_city_and_existing_city_is_kept() {
        let (orchestrator, _temp) = setup();
        completed(orchestrator.ingest_blocking("novamedika", "12", ""));
        let created = orchestrator
            .storage()
            .find_branch("Новамедика", "12")
            .unwrap()
            .unwrap();
        assert_eq!(created.city.as_deref(), Some(NEW_BRANCH_CITY));

        let mut staffed = created.clone();
        staffed.city = Some("Минск".to_string());
        orchestrator.storage().put_branch(&staffed).unwrap();

        completed(orchestrator.ingest_blocking("NovaMedika", " 12 ", &row("A", "1", "01.01.2030")));
        let branch = orchestrator
            .storage()
            .find_branch("Новамедика", "12")
            .unwrap()
            .unwrap();
        assert_eq!(branch.branch_id, created.branch_id);
        assert_eq!(branch.city.as_deref(), Some("Минск"));
    }

    #[test]
    fn test_commit_records_delete_then_upsert_events() {
        let (orchestrator, _temp) = setup();
        completed(orchestrator.ingest_blocking("novamedika", "12", &row("A", "1", "01.01.2030")));
        let old_ids: Vec<Uuid> = branch_records(&orchestrator)
            .iter()
            .map(|r| r.record_id)
            .collect();
        let start = orchestrator.storage().get_stats().unwrap().outbox_count;

        completed(orchestrator.ingest_blocking("novamedika", "12", &row("B", "2", "01.01.2030")));
        let new_ids: Vec<Uuid> = branch_records(&orchestrator)
            .iter()
            .map(|r| r.record_id)
            .collect();

        let events = orchestrator
            .storage()
            .get_outbox_entries(start, 10)
            .unwrap();
        let kinds: Vec<ChangeKind> = events.iter().map(|(_, e)| e.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::RecordsDeleted, ChangeKind::RecordsUpserted]);
        assert_eq!(events[0].1.record_ids, old_ids);
        assert_eq!(events[1].1.record_ids, new_ids);
    }

    #[test]
    fn test_notifier_fires_after_commit() {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let notifier = ChangeNotifier::new();
        let orchestrator = IngestionOrchestrator::new(storage, IngestSettings::default())
            .with_notifier(notifier.clone());

        completed(orchestrator.ingest_blocking("ekliniya", "3", &row("A", "1", "01.01.2030")));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        runtime.block_on(async {
            tokio::time::timeout(std::time::Duration::from_secs(1), notifier.notified())
                .await
                .expect("notification pending");
        });
    }

    #[tokio::test]
    async fn test_submit_upload_rejections_create_no_task() {
        let (orchestrator, _temp) = setup();
        let csv = row("A", "1", "01.01.2030");

        let err = orchestrator
            .submit_upload("novamedika", "12", None, csv.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(ref m) if m == "No file uploaded"));

        let err = orchestrator
            .submit_upload("novamedika", "12", Some("stock.xlsx"), csv.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(ref m) if m == "Only CSV files allowed"));

        let err = orchestrator
            .submit_upload("apteka", "12", Some("stock.csv"), csv.as_bytes())
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert!(orchestrator.storage().list_tasks(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_upload_queues_pending_task() {
        let (orchestrator, _temp) = setup();
        let csv = row("A", "1", "01.01.2030");

        let task_id = orchestrator
            .submit_upload("novamedika", "12", Some("STOCK.CSV"), csv.as_bytes())
            .await
            .unwrap();

        let task = orchestrator.storage().get_task(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.max_attempts, 4);
        assert_eq!(orchestrator.storage().get_stats().unwrap().queued_job_count, 1);

        let jobs = orchestrator
            .storage()
            .claim_ready_jobs(Utc::now().timestamp_millis(), 1_000, 10)
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].task_id, task_id);
        assert_eq!(jobs[0].csv_text, csv);
        assert_eq!(jobs[0].encoding.as_deref(), Some("UTF-8"));
    }
}
