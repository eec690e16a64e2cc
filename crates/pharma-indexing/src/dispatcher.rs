//! Change dispatcher: applies storage outbox events to the product index.
//!
//! Events are read in sequence order from the dispatcher checkpoint, each
//! is mapped to one synchronizer call, and the checkpoint is saved after
//! every batch. Delivery is at-least-once; replayed events are harmless
//! because synchronizer writes are idempotent.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pharma_storage::Storage;
use pharma_types::{ChangeEvent, ChangeKind};

use crate::checkpoint::{DispatchCheckpoint, DISPATCH_CHECKPOINT_KEY};
use crate::error::IndexingError;
use crate::outcome::SyncOutcome;
use crate::synchronizer::IndexSynchronizer;

/// Default outbox entries read per batch
const DEFAULT_BATCH_SIZE: usize = 100;

/// Wakes the dispatcher right after a commit instead of waiting for the
/// next scheduled run. Notifications coalesce.
#[derive(Debug, Clone, Default)]
pub struct ChangeNotifier {
    notify: Arc<Notify>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.notify.notify_one();
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// Result of one dispatch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchResult {
    /// Events applied and checkpointed
    pub events: usize,
    /// Last sequence applied
    pub last_sequence: Option<u64>,
    /// Combined counters of the synchronizer calls
    pub outcome: SyncOutcome,
    /// Stopped early because the index could not be written
    pub stalled: bool,
}

/// Consumes the outbox and drives the synchronizer.
pub struct ChangeDispatcher {
    storage: Arc<Storage>,
    synchronizer: Arc<IndexSynchronizer>,
    notifier: ChangeNotifier,
    batch_size: usize,
    /// One dispatch run at a time
    run_lock: Mutex<()>,
}

impl ChangeDispatcher {
    pub fn new(
        storage: Arc<Storage>,
        synchronizer: Arc<IndexSynchronizer>,
        notifier: ChangeNotifier,
    ) -> Self {
        Self {
            storage,
            synchronizer,
            notifier,
            batch_size: DEFAULT_BATCH_SIZE,
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    async fn load_checkpoint(&self) -> Result<DispatchCheckpoint, IndexingError> {
        let storage = self.storage.clone();
        let bytes =
            tokio::task::spawn_blocking(move || storage.get_checkpoint(DISPATCH_CHECKPOINT_KEY))
                .await??;
        match bytes {
            Some(bytes) => DispatchCheckpoint::from_bytes(&bytes),
            None => {
                debug!("No dispatcher checkpoint, starting from 0");
                Ok(DispatchCheckpoint::new())
            }
        }
    }

    /// Save the checkpoint and delete the outbox entries it covers.
    async fn commit_checkpoint(&self, checkpoint: &DispatchCheckpoint) -> Result<(), IndexingError> {
        let bytes = checkpoint.to_bytes()?;
        let storage = self.storage.clone();
        let applied_through = checkpoint.next_sequence.checked_sub(1);
        tokio::task::spawn_blocking(move || {
            storage.put_checkpoint(DISPATCH_CHECKPOINT_KEY, &bytes)?;
            if let Some(sequence) = applied_through {
                storage.delete_outbox_entries(sequence)?;
            }
            Ok::<_, IndexingError>(())
        })
        .await??;
        Ok(())
    }

    /// Map one event to its synchronizer call.
    async fn apply(&self, event: &ChangeEvent) -> SyncOutcome {
        match event.kind {
            ChangeKind::RecordsUpserted => {
                self.synchronizer.update_records(event.record_ids.clone()).await
            }
            ChangeKind::RecordsDeleted | ChangeKind::BranchDeleted => {
                self.synchronizer.remove_records(event.record_ids.clone()).await
            }
            ChangeKind::BranchCityChanged | ChangeKind::BranchUpdated => {
                match (&event.branch_name, &event.branch_number, event.branch_id) {
                    (Some(name), Some(number), _) => {
                        self.synchronizer.update_for_branch(name, number).await
                    }
                    (_, _, Some(branch_id)) => {
                        self.synchronizer.update_for_branch_id(branch_id).await
                    }
                    _ => SyncOutcome::skipped("branch event without branch identity"),
                }
            }
        }
    }

    /// Apply every pending outbox event.
    ///
    /// Stops early, keeping the checkpoint before the event, when the index
    /// is unreachable or storage could not be read; the next run retries
    /// it. Documents the backend rejects are counted and passed over, the
    /// scheduled full resync picks them up again.
    pub async fn dispatch_pending(&self) -> Result<DispatchResult, IndexingError> {
        let _guard = self.run_lock.lock().await;
        let started = Instant::now();
        let mut checkpoint = self.load_checkpoint().await?;
        let mut result = DispatchResult::default();

        loop {
            let storage = self.storage.clone();
            let (start, limit) = (checkpoint.next_sequence, self.batch_size);
            let entries =
                tokio::task::spawn_blocking(move || storage.get_outbox_entries(start, limit))
                    .await??;
            if entries.is_empty() {
                break;
            }

            let mut applied = 0u64;
            let mut stop = false;
            for (sequence, event) in &entries {
                let outcome = self.apply(event).await;
                if outcome.should_retry() {
                    warn!(
                        sequence,
                        kind = ?event.kind,
                        status = ?outcome.status,
                        reason = outcome.reason.as_deref().unwrap_or(""),
                        "Change not applied, will retry"
                    );
                    result.stalled = true;
                    result.outcome.merge(&outcome);
                    stop = true;
                    break;
                }
                result.outcome.merge(&outcome);
                checkpoint.advance(*sequence, 1);
                result.last_sequence = Some(*sequence);
                applied += 1;
            }

            if applied > 0 {
                self.commit_checkpoint(&checkpoint).await?;
                result.events += applied as usize;
            }
            if stop || entries.len() < self.batch_size {
                break;
            }
        }

        result.outcome = std::mem::take(&mut result.outcome).finish();
        if result.events > 0 || result.stalled {
            info!(
                events = result.events,
                last_sequence = ?result.last_sequence,
                stalled = result.stalled,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Dispatched change events"
            );
        }
        Ok(result)
    }

    /// Dispatch whenever notified until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Change dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.notifier.notified() => {
                    if let Err(e) = self.dispatch_pending().await {
                        error!(error = %e, "Change dispatch failed");
                    }
                }
            }
        }
        info!("Change dispatcher stopped");
    }
}
