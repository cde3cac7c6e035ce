//! Event finders: which pending rows the next run processes.
//!
//! Every finder returns committed rows in id order, oldest first, and skips
//! rows whose `process_after_ms` lies in the future. Finders differ only in
//! the extra predicate they apply, which lets several workers split one
//! queue between them.
//!
//! Rows that cannot be decoded are returned separately in
//! [`PendingBatch::corrupt`] so the worker can drop them instead of stalling
//! the queue behind them.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use xxhash_rust::xxh3::xxh3_64;

use outbox_storage::{CorruptRow, OutboxRow, Storage};
use outbox_types::{EventRecord, ShardingSettings};

use crate::error::IndexingError;

/// Rows selected for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    /// Due events, oldest first
    pub records: Vec<EventRecord>,
    /// Undecodable rows met while scanning
    pub corrupt: Vec<CorruptRow>,
}

impl PendingBatch {
    /// Total rows selected, corrupt ones included.
    pub fn len(&self) -> usize {
        self.records.len() + self.corrupt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.corrupt.is_empty()
    }
}

/// Strategy for selecting the next batch of pending rows.
pub trait EventFinder: Send + Sync {
    /// Return up to `batch_size` due rows, oldest first.
    fn find_pending(&self, storage: &Storage, batch_size: usize)
        -> Result<PendingBatch, IndexingError>;

    /// Get the name of this finder for logging.
    fn name(&self) -> &str;
}

/// Scan committed rows in id order, keeping due rows that match `accept` and
/// corrupt rows that match `accept_corrupt`.
fn collect_due<F, C>(
    storage: &Storage,
    batch_size: usize,
    accept: F,
    accept_corrupt: C,
) -> Result<PendingBatch, IndexingError>
where
    F: Fn(&EventRecord) -> bool,
    C: Fn(&CorruptRow) -> bool,
{
    let mut batch = PendingBatch::default();
    if batch_size == 0 {
        return Ok(batch);
    }

    let now_ms = Utc::now().timestamp_millis();
    storage.scan_outbox(|row| {
        match row {
            OutboxRow::Event(record) => {
                if record.event.is_due(now_ms) && accept(&record) {
                    batch.records.push(record);
                }
            }
            OutboxRow::Corrupt(corrupt) => {
                if accept_corrupt(&corrupt) {
                    batch.corrupt.push(corrupt);
                }
            }
        }
        batch.len() < batch_size
    })?;
    Ok(batch)
}

/// Finder with no predicate: the whole queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEventFinder;

impl EventFinder for DefaultEventFinder {
    fn find_pending(&self, storage: &Storage, batch_size: usize) -> Result<PendingBatch, IndexingError> {
        collect_due(storage, batch_size, |_| true, |_| true)
    }

    fn name(&self) -> &str {
        "default"
    }
}

type RecordPredicate = dyn Fn(&EventRecord) -> bool + Send + Sync;

/// Finder restricted by a deployment-supplied predicate.
#[derive(Clone)]
pub struct PredicateEventFinder {
    name: String,
    predicate: Arc<RecordPredicate>,
}

impl PredicateEventFinder {
    /// Create a finder keeping only rows for which `predicate` holds.
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&EventRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }
}

impl fmt::Debug for PredicateEventFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateEventFinder")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl EventFinder for PredicateEventFinder {
    fn find_pending(&self, storage: &Storage, batch_size: usize) -> Result<PendingBatch, IndexingError> {
        collect_due(storage, batch_size, |record| (self.predicate)(record), |_| true)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Hash partitioning on the entity id.
///
/// All rows of one entity hash to the same shard, so per-entity ordering and
/// retry merging stay within a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    total_shards: u32,
    assigned_shards: Vec<u32>,
    name: String,
}

impl ShardAssignment {
    /// Create an assignment, validating shard numbers.
    pub fn new(total_shards: u32, assigned_shards: Vec<u32>) -> Result<Self, IndexingError> {
        Self::from_settings(&ShardingSettings {
            total_shards,
            assigned_shards,
        })
    }

    /// Build from configuration.
    pub fn from_settings(settings: &ShardingSettings) -> Result<Self, IndexingError> {
        settings
            .validate()
            .map_err(|e| IndexingError::InvalidInput(e.to_string()))?;

        let mut assigned_shards = settings.assigned_shards.clone();
        assigned_shards.sort_unstable();
        assigned_shards.dedup();

        let shard_list: Vec<String> = assigned_shards.iter().map(u32::to_string).collect();
        let name = format!("shards[{}]/{}", shard_list.join(","), settings.total_shards);

        Ok(Self {
            total_shards: settings.total_shards,
            assigned_shards,
            name,
        })
    }

    /// Shard an entity id belongs to.
    pub fn shard_of(&self, entity_id: &str) -> u32 {
        (xxh3_64(entity_id.as_bytes()) % u64::from(self.total_shards)) as u32
    }

    /// Whether this worker owns `record`.
    pub fn owns(&self, record: &EventRecord) -> bool {
        self.assigned_shards
            .binary_search(&self.shard_of(&record.event.entity_id))
            .is_ok()
    }

    /// Whether this worker is responsible for dropping an undecodable row.
    ///
    /// The entity id is unreadable, so the raw key is hashed instead.
    pub fn owns_corrupt(&self, row: &CorruptRow) -> bool {
        let shard = (xxh3_64(&row.key) % u64::from(self.total_shards)) as u32;
        self.assigned_shards.binary_search(&shard).is_ok()
    }
}

impl EventFinder for ShardAssignment {
    fn find_pending(&self, storage: &Storage, batch_size: usize) -> Result<PendingBatch, IndexingError> {
        collect_due(
            storage,
            batch_size,
            |record| self.owns(record),
            |row| self.owns_corrupt(row),
        )
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{DocumentRoutes, OutboxEvent, OutboxOperation};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn insert(storage: &Storage, events: Vec<OutboxEvent>) -> Vec<u64> {
        let mut txn = storage.begin();
        let ids = events
            .iter()
            .map(|e| txn.insert_event(e).unwrap())
            .collect();
        txn.commit().unwrap();
        ids
    }

    /// Write a raw outbox value under `id`, bypassing event encoding.
    fn put_raw_row(path: &std::path::Path, id: u64, value: &[u8]) {
        use outbox_storage::column_families::{CF_ENTITIES, CF_OUTBOX};
        use outbox_storage::OutboxKey;

        let db = rocksdb::DB::open_cf(&rocksdb::Options::default(), path, [CF_ENTITIES, CF_OUTBOX])
            .unwrap();
        let cf = db.cf_handle(CF_OUTBOX).unwrap();
        db.put_cf(cf, OutboxKey::new(id).to_bytes(), value).unwrap();
    }

    fn event(entity_type: &str, entity_id: &str) -> OutboxEvent {
        OutboxEvent::new(entity_type, entity_id, OutboxOperation::Add, DocumentRoutes::unrouted())
    }

    #[test]
    fn test_default_finder_oldest_first_and_limited() {
        let (storage, _temp) = create_test_storage();
        let ids = insert(
            &storage,
            (0..5).map(|i| event("Book", &i.to_string())).collect(),
        );

        let batch = DefaultEventFinder.find_pending(&storage, 3).unwrap();
        let found: Vec<_> = batch.records.iter().map(|r| r.id).collect();
        assert_eq!(found, ids[..3].to_vec());
    }

    #[test]
    fn test_uncommitted_rows_invisible() {
        let (storage, _temp) = create_test_storage();
        let mut txn = storage.begin();
        txn.insert_event(&event("Book", "1")).unwrap();

        assert!(DefaultEventFinder.find_pending(&storage, 10).unwrap().is_empty());
        txn.commit().unwrap();
        assert_eq!(DefaultEventFinder.find_pending(&storage, 10).unwrap().len(), 1);
    }

    #[test]
    fn test_skips_rows_not_yet_due() {
        let (storage, _temp) = create_test_storage();
        let far_future = Utc::now().timestamp_millis() + 3_600_000;
        insert(
            &storage,
            vec![
                event("Book", "1").with_process_after(far_future),
                event("Book", "2"),
            ],
        );

        let batch = DefaultEventFinder.find_pending(&storage, 10).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.records[0].event.entity_id, "2");
    }

    #[test]
    fn test_predicate_finder() {
        let (storage, _temp) = create_test_storage();
        insert(
            &storage,
            vec![event("Book", "1"), event("Author", "1"), event("Book", "2")],
        );

        let finder = PredicateEventFinder::new("books", |r| r.event.entity_type == "Book");
        let batch = finder.find_pending(&storage, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch.records.iter().all(|r| r.event.entity_type == "Book"));
        assert_eq!(finder.name(), "books");
    }

    #[test]
    fn test_shards_partition_the_queue() {
        let (storage, _temp) = create_test_storage();
        insert(
            &storage,
            (0..40).map(|i| event("Book", &i.to_string())).collect(),
        );

        let even = ShardAssignment::new(2, vec![0]).unwrap();
        let odd = ShardAssignment::new(2, vec![1]).unwrap();

        let a = even.find_pending(&storage, 100).unwrap();
        let b = odd.find_pending(&storage, 100).unwrap();
        assert_eq!(a.len() + b.len(), 40);
        assert!(a
            .records
            .iter()
            .all(|r| !b.records.iter().any(|o| o.id == r.id)));
    }

    #[test]
    fn test_corrupt_rows_returned_apart_from_events() {
        let temp_dir = TempDir::new().unwrap();
        {
            let storage = Storage::open(temp_dir.path()).unwrap();
            insert(&storage, vec![event("Book", "2")]);
        }
        put_raw_row(temp_dir.path(), 0, b"not json");

        let storage = Storage::open(temp_dir.path()).unwrap();
        let batch = DefaultEventFinder.find_pending(&storage, 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].event.entity_id, "2");
        assert_eq!(batch.corrupt.len(), 1);
        assert_eq!(batch.corrupt[0].id, Some(0));

        // Corrupt rows count toward the batch size
        let batch = DefaultEventFinder.find_pending(&storage, 1).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.corrupt.len(), 1);
    }

    #[test]
    fn test_exactly_one_shard_owns_a_corrupt_row() {
        let even = ShardAssignment::new(2, vec![0]).unwrap();
        let odd = ShardAssignment::new(2, vec![1]).unwrap();
        for id in 0..20u64 {
            let row = CorruptRow {
                key: outbox_storage::OutboxKey::new(id).to_bytes(),
                id: Some(id),
                reason: "bad".to_string(),
            };
            assert_ne!(even.owns_corrupt(&row), odd.owns_corrupt(&row));
        }
    }

    #[test]
    fn test_shard_of_is_stable() {
        let shards = ShardAssignment::new(8, vec![0, 1]).unwrap();
        assert_eq!(shards.shard_of("isbn-42"), shards.shard_of("isbn-42"));
        assert!(shards.shard_of("isbn-42") < 8);
        assert_eq!(shards.name(), "shards[0,1]/8");
    }

    #[test]
    fn test_invalid_shard_assignment() {
        assert!(ShardAssignment::new(0, vec![0]).is_err());
        assert!(ShardAssignment::new(2, vec![]).is_err());
        assert!(ShardAssignment::new(2, vec![2]).is_err());
    }
}
