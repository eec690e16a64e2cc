//! Graceful degradation E2E tests.
//!
//! Uploads must succeed while the search backend is down; change events
//! stay in the outbox and are applied once the backend is back.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{csv_of, csv_row, OfflineBackend, TestHarness};
use pharma_indexing::{ChangeDispatcher, ChangeNotifier, IndexSynchronizer, SyncConfig};
use pharma_search::SearchBackend;
use pharma_types::TaskStatus;

#[tokio::test]
async fn test_outbox_holds_events_while_backend_offline() {
    let harness = TestHarness::new();
    let offline_sync = Arc::new(IndexSynchronizer::new(
        harness.storage.clone(),
        Arc::new(OfflineBackend),
        SyncConfig::default(),
    ));
    let offline_dispatcher =
        ChangeDispatcher::new(harness.storage.clone(), offline_sync.clone(), ChangeNotifier::new());

    let task = harness
        .upload(
            "novamedika",
            "12",
            &csv_of(&[
                csv_row("Аспирин ТАБЛ. 500мг", "AB-1", "31.12.2027"),
                csv_row("Нурофен капс. 200мг", "NF-2", "01.06.2027"),
            ]),
        )
        .await;
    assert_eq!(task.status, TaskStatus::Completed);

    let outbox_before = harness.storage.get_stats().unwrap().outbox_count;
    assert!(outbox_before > 0);

    let stalled = offline_dispatcher.dispatch_pending().await.unwrap();
    assert!(stalled.stalled);
    assert_eq!(stalled.events, 0);
    assert_eq!(harness.storage.get_stats().unwrap().outbox_count, outbox_before);

    // Direct calls skip instead of failing
    assert!(offline_sync.full_resync().await.is_backend_unavailable());

    let recovered = harness.dispatcher.dispatch_pending().await.unwrap();
    assert!(!recovered.stalled);
    assert_eq!(recovered.outcome.indexed, 2);
    assert_eq!(harness.storage.get_stats().unwrap().outbox_count, 0);
    assert_eq!(
        harness.indexed_ids().await,
        harness.stored_ids("Новамедика", "12")
    );
}

/// Dispatching twice applies nothing the second time.
#[tokio::test]
async fn test_dispatch_resumes_from_checkpoint() {
    let harness = TestHarness::new();
    harness
        .upload(
            "novamedika",
            "12",
            &csv_of(&[csv_row("Аспирин ТАБЛ. 500мг", "AB-1", "31.12.2027")]),
        )
        .await;

    let first = harness.dispatcher.dispatch_pending().await.unwrap();
    assert!(first.events > 0);
    let second = harness.dispatcher.dispatch_pending().await.unwrap();
    assert_eq!(second.events, 0);

    harness
        .upload(
            "novamedika",
            "12",
            &csv_of(&[csv_row("Цитрамон ТАБЛ. N10", "CT-9", "01.01.2028")]),
        )
        .await;
    let third = harness.dispatcher.dispatch_pending().await.unwrap();
    assert!(third.last_sequence > first.last_sequence);
    assert_eq!(harness.backend.count().await.unwrap(), 1);
}
