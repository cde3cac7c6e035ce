//! Concurrency E2E tests.
//!
//! At most one run is in flight per processor, a write committed while a run
//! is in flight is still picked up, and a purge racing a run sticks.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{fast_config, wait_for_drain, wait_until, TestHarness, BOOK};
use outbox_indexing::MockBackend;
use outbox_scheduler::SchedulerError;
use outbox_storage::StorageError;
use outbox_types::{EntityReference, OutboxOperation};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_never_overlap_runs() {
    let harness = TestHarness::with_backend(MockBackend::new().with_delay(Duration::from_millis(30)));
    for i in 0..20 {
        harness.save_book(&i.to_string(), "Title", OutboxOperation::Add);
    }

    let processor = Arc::new(harness.processor(fast_config().with_batch_size(3)));
    processor.start().unwrap();

    let mut triggers = Vec::new();
    for _ in 0..8 {
        let processor = processor.clone();
        triggers.push(tokio::spawn(async move {
            for _ in 0..25 {
                processor.ensure_scheduled();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }
    for trigger in triggers {
        trigger.await.unwrap();
    }

    assert!(wait_for_drain(&harness.storage, Duration::from_secs(10)).await);
    processor.stop().await.unwrap();

    assert_eq!(harness.backend.max_in_flight(), 1);
    assert_eq!(harness.backend.recorded_works().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_write_during_run_is_picked_up() {
    let harness = TestHarness::with_backend(MockBackend::new().with_delay(Duration::from_millis(100)));
    harness.save_book("1", "Dune", OutboxOperation::Add);

    // Long polling interval: only the explicit trigger can pick up the second write quickly.
    let processor = harness.processor(fast_config().with_polling_interval(Duration::from_secs(30)));
    processor.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || harness.backend.execution_count() == 1).await);
    harness.save_book("2", "Emma", OutboxOperation::Add);
    processor.ensure_scheduled();

    assert!(wait_for_drain(&harness.storage, Duration::from_secs(3)).await);
    assert_eq!(harness.works_for("2").len(), 1);
    processor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_idle_processor_wakes_on_trigger() {
    let harness = TestHarness::new();
    let processor = harness.processor(fast_config().with_polling_interval(Duration::from_secs(30)));
    processor.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || processor.stats().empty_polls >= 1).await);

    harness.save_book("1", "Dune", OutboxOperation::Add);
    processor.ensure_scheduled();

    assert!(wait_for_drain(&harness.storage, Duration::from_secs(3)).await);
    processor.stop().await.unwrap();
}

/// Without a trigger, the polling interval alone picks up new writes.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_polling_picks_up_untriggered_writes() {
    let harness = TestHarness::new();
    let processor = harness.processor(fast_config());
    processor.start().unwrap();

    assert!(wait_until(Duration::from_secs(2), || processor.stats().empty_polls >= 1).await);
    harness.save_book("1", "Dune", OutboxOperation::Add);

    assert!(wait_for_drain(&harness.storage, Duration::from_secs(3)).await);
    processor.stop().await.unwrap();
}

/// Rows purged while a run is sending them stay purged: the run's commit is
/// rejected and no retry successor is written.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_purge_between_read_and_commit_sticks() {
    let harness = TestHarness::with_backend(MockBackend::new().with_delay(Duration::from_millis(200)));
    harness
        .backend
        .always_fail_entity(EntityReference::new(BOOK, "1"));
    harness.save_book("1", "Dune", OutboxOperation::Add);
    harness.save_book("2", "Emma", OutboxOperation::Add);

    let processor = Arc::new(harness.processor(fast_config()));
    let run = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run_once().await })
    };

    assert!(wait_until(Duration::from_secs(2), || harness.backend.execution_count() == 1).await);
    let purged = harness
        .storage
        .purge_events(|record| record.event.entity_id == "1")
        .unwrap();
    assert_eq!(purged, 1);

    match run.await.unwrap() {
        Err(SchedulerError::Storage(StorageError::Conflict(_))) => {}
        other => panic!("Expected commit conflict, got {:?}", other),
    }

    // Book#1 was not resurrected; Book#2 is still queued for the next run.
    let remaining = harness.storage.get_events(0, 10).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].event.entity_id, "2");
    assert_eq!(remaining[0].event.retry_count, 0);

    let summary = processor.run_once().await.unwrap();
    assert_eq!(summary.consumed, 1);
    assert_eq!(harness.pending(), 0);
    assert!(harness.failures.failures().is_empty());
}
