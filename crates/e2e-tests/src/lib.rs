//! End-to-end test infrastructure for the search outbox.
//!
//! Provides a shared TestHarness and helper functions for E2E tests
//! covering the full write-to-index pipeline: a business transaction that
//! records outbox events, a background processor, and a mock backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use outbox_indexing::{
    EventFinder, FailureHandler, IndexingWork, MockBackend, RecordingFailureHandler, SendingPlan,
};
use outbox_scheduler::{BackgroundProcessor, ProcessorConfig};
use outbox_storage::column_families::{CF_ENTITIES, CF_OUTBOX};
use outbox_storage::{OutboxKey, Storage};
use outbox_types::{DocumentRoutes, OutboxOperation};

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Shared storage instance
    pub storage: Arc<Storage>,
    /// Backend every processor built by this harness writes to
    pub backend: Arc<MockBackend>,
    /// Collects permanent failures
    pub failures: Arc<RecordingFailureHandler>,
}

impl TestHarness {
    /// Create a new test harness with temp directory and storage.
    pub fn new() -> Self {
        Self::with_backend(MockBackend::new())
    }

    /// Create a harness around a preconfigured backend.
    pub fn with_backend(backend: MockBackend) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            backend: Arc::new(backend),
            failures: Arc::new(RecordingFailureHandler::new()),
        }
    }

    /// Create a harness whose outbox already holds raw `(id, value)` rows,
    /// written below the storage layer so they need not decode.
    pub fn with_raw_outbox_rows(rows: &[(u64, &[u8])]) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        drop(Storage::open(temp_dir.path()).expect("Failed to create test storage"));
        {
            let db = rocksdb::DB::open_cf(
                &rocksdb::Options::default(),
                temp_dir.path(),
                [CF_ENTITIES, CF_OUTBOX],
            )
            .expect("Failed to open raw database");
            let cf = db.cf_handle(CF_OUTBOX).expect("Missing outbox column family");
            for (id, value) in rows {
                db.put_cf(cf, OutboxKey::new(*id).to_bytes(), value)
                    .expect("Failed to write raw row");
            }
        }
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        Self {
            _temp_dir: temp_dir,
            storage,
            backend: Arc::new(MockBackend::new()),
            failures: Arc::new(RecordingFailureHandler::new()),
        }
    }

    /// Build a stopped processor with the harness backend and failure recorder.
    pub fn processor(&self, config: ProcessorConfig) -> BackgroundProcessor {
        self.processor_with_finder(config, None)
    }

    /// Build a stopped processor using `finder` when given.
    pub fn processor_with_finder(
        &self,
        config: ProcessorConfig,
        finder: Option<Arc<dyn EventFinder>>,
    ) -> BackgroundProcessor {
        let failures: Arc<dyn FailureHandler> = self.failures.clone();
        let mut builder = BackgroundProcessor::builder(self.storage.clone(), self.backend.clone())
            .with_config(config)
            .with_failure_handler(failures);
        if let Some(finder) = finder {
            builder = builder.with_finder(finder);
        }
        builder.build().expect("Failed to build processor")
    }

    /// Save a book and record its indexing intent in one transaction.
    pub fn save_book(&self, id: &str, title: &str, operation: OutboxOperation) -> u64 {
        self.save_book_routed(id, title, operation, DocumentRoutes::unrouted())
    }

    /// Like `save_book`, with explicit routes.
    pub fn save_book_routed(
        &self,
        id: &str,
        title: &str,
        operation: OutboxOperation,
        routes: DocumentRoutes,
    ) -> u64 {
        let mut txn = self.storage.begin();
        let mut plan = SendingPlan::new();
        match operation {
            OutboxOperation::Add => {
                put_book(&mut txn, id, title);
                plan.add(BOOK, id, routes);
            }
            OutboxOperation::AddOrUpdate => {
                put_book(&mut txn, id, title);
                plan.add_or_update(BOOK, id, routes);
            }
            OutboxOperation::Delete => {
                txn.delete_entity(BOOK, id).expect("Failed to delete book");
                plan.delete(BOOK, id, routes);
            }
        }

        let ids = plan
            .send_and_report(&mut txn)
            .into_result()
            .expect("Failed to queue outbox event");
        txn.commit().expect("Failed to commit business transaction");
        ids[0]
    }

    /// Pending outbox events.
    pub fn pending(&self) -> u64 {
        self.storage.count_events().expect("Failed to count events")
    }

    /// Works the backend received for one book, in arrival order.
    pub fn works_for(&self, id: &str) -> Vec<IndexingWork> {
        self.backend
            .recorded_works()
            .into_iter()
            .filter(|w| w.reference.entity_type == BOOK && w.reference.entity_id == id)
            .collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity type used by the harness helpers.
pub const BOOK: &str = "Book";

fn put_book(txn: &mut outbox_storage::StorageTransaction<'_>, id: &str, title: &str) {
    let body = serde_json::json!({ "id": id, "title": title });
    let bytes = serde_json::to_vec(&body).expect("Failed to serialize book");
    txn.put_entity(BOOK, id, &bytes)
        .expect("Failed to write book");
}

/// Processor configuration tuned for tests: short polling, quick shutdown.
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_polling_interval(Duration::from_millis(20))
        .with_shutdown_timeout(Duration::from_secs(5))
}

/// Poll until `condition` holds or `timeout` elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the outbox is empty.
pub async fn wait_for_drain(storage: &Storage, timeout: Duration) -> bool {
    wait_until(timeout, || storage.count_events().map(|n| n == 0).unwrap_or(false)).await
}
