//! Sharded processing E2E tests.
//!
//! Two processors with disjoint shard assignments share one queue; every
//! entity is indexed by exactly one of them.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use e2e_tests::{fast_config, wait_for_drain, TestHarness};
use outbox_indexing::{EventFinder, ShardAssignment};
use outbox_types::OutboxOperation;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disjoint_shards_split_the_queue() {
    let harness = TestHarness::new();
    let ids: Vec<String> = (0..40).map(|i| format!("book-{}", i)).collect();
    for id in &ids {
        harness.save_book(id, "Title", OutboxOperation::Add);
    }

    let even = ShardAssignment::new(4, vec![0, 2]).unwrap();
    let odd = ShardAssignment::new(4, vec![1, 3]).unwrap();
    let expected_even = ids.iter().filter(|id| even.shard_of(id) % 2 == 0).count();

    let even: Arc<dyn EventFinder> = Arc::new(even);
    let odd: Arc<dyn EventFinder> = Arc::new(odd);
    let first = harness.processor_with_finder(
        fast_config().with_queue_name("outbox-even").with_batch_size(5),
        Some(even),
    );
    let second = harness.processor_with_finder(
        fast_config().with_queue_name("outbox-odd").with_batch_size(5),
        Some(odd),
    );
    first.start().unwrap();
    second.start().unwrap();

    assert!(wait_for_drain(&harness.storage, Duration::from_secs(10)).await);
    first.stop().await.unwrap();
    second.stop().await.unwrap();

    for id in &ids {
        assert_eq!(harness.works_for(id).len(), 1, "{} indexed once", id);
    }
    assert_eq!(first.stats().events_consumed as usize, expected_even);
    assert_eq!(
        second.stats().events_consumed as usize,
        ids.len() - expected_even
    );
}

#[tokio::test]
async fn test_unowned_events_are_left_alone() {
    let harness = TestHarness::new();
    let assignment = ShardAssignment::new(2, vec![0]).unwrap();

    let owned = (0..)
        .map(|i| format!("book-{}", i))
        .find(|id| assignment.shard_of(id) == 0)
        .unwrap();
    let foreign = (0..)
        .map(|i| format!("book-{}", i))
        .find(|id| assignment.shard_of(id) == 1)
        .unwrap();
    harness.save_book(&owned, "Mine", OutboxOperation::Add);
    harness.save_book(&foreign, "Theirs", OutboxOperation::Add);

    let finder: Arc<dyn EventFinder> = Arc::new(assignment);
    let processor = harness.processor_with_finder(fast_config(), Some(finder));
    let summary = processor.run_once().await.unwrap();

    assert_eq!(summary.fetched, 1);
    assert_eq!(harness.pending(), 1);
    let remaining = harness.storage.get_events(0, 10).unwrap();
    assert_eq!(remaining[0].event.entity_id, foreign);
}
