//! RocksDB wrapper for outbox storage.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Store-assigned outbox ids, recovered from the highest key on open
//! - Ordered reads of pending outbox rows, undecodable rows included
//! - Transactions (see [`StorageTransaction`])
//!
//! Commits that consume outbox rows and administrative purges are serialized
//! on one commit lock, so a purge can never be undone by a run that read the
//! purged rows before it.

use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use outbox_types::{EventRecord, OutboxEvent};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_ENTITIES, CF_OUTBOX};
use crate::error::StorageError;
use crate::keys::{EntityKey, OutboxKey};
use crate::transaction::StorageTransaction;

/// Main storage interface for the outbox and the entities it tracks
pub struct Storage {
    db: DB,
    /// Outbox sequence counter for monotonic ordering
    outbox_sequence: AtomicU64,
    /// Held while a commit checks its preconditions and writes
    commit_lock: Mutex<()>,
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
        debug!(next_id = outbox_sequence, "Recovered outbox sequence");

        Ok(Self {
            db,
            outbox_sequence: AtomicU64::new(outbox_sequence),
            commit_lock: Mutex::new(()),
        })
    }

    /// Load the next outbox sequence number from the highest stored key
    fn load_outbox_sequence(db: &DB) -> Result<u64, StorageError> {
        let cf = db
            .cf_handle(CF_OUTBOX)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(CF_OUTBOX.to_string()))?;

        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        if let Some(result) = iter.next() {
            let (key, _) = result?;
            let outbox_key = OutboxKey::from_bytes(&key)?;
            return Ok(outbox_key.sequence + 1);
        }
        Ok(1)
    }

    /// Allocate the next outbox id
    pub(crate) fn next_outbox_sequence(&self) -> u64 {
        self.outbox_sequence.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    pub(crate) fn write(&self, batch: WriteBatch) -> Result<(), StorageError> {
        self.db.write(batch)?;
        Ok(())
    }

    pub(crate) fn lock_commits(&self) -> MutexGuard<'_, ()> {
        self.commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn outbox_row_exists(&self, key: &[u8]) -> Result<bool, StorageError> {
        let cf = self.cf(CF_OUTBOX)?;
        Ok(self.db.get_cf(cf, key)?.is_some())
    }

    /// Begin a transaction. Nothing is written until [`StorageTransaction::commit`].
    pub fn begin(&self) -> StorageTransaction<'_> {
        StorageTransaction::new(self)
    }

    // ==================== Entity Methods ====================

    /// Get an entity row
    pub fn get_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let cf = self.cf(CF_ENTITIES)?;
        let key = EntityKey::new(entity_type, entity_id)?;
        Ok(self.db.get_cf(cf, key.to_bytes())?)
    }

    // ==================== Outbox Methods ====================

    /// Visit every committed outbox row in key order, oldest first.
    ///
    /// Rows that cannot be decoded are handed over as [`OutboxRow::Corrupt`]
    /// instead of failing the scan. `visit` returns `false` to stop early.
    pub fn scan_outbox<F>(&self, mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(OutboxRow) -> bool,
    {
        let cf = self.cf(CF_OUTBOX)?;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let row = match decode_record(&key, &value) {
                Ok(record) => OutboxRow::Event(record),
                Err(e) => OutboxRow::Corrupt(CorruptRow::new(&key, &e)),
            };
            if !visit(row) {
                break;
            }
        }
        Ok(())
    }

    /// Visit committed outbox events in id order, oldest first.
    ///
    /// Undecodable rows are skipped with a warning. `visit` returns `false`
    /// to stop the scan early.
    pub fn scan_events<F>(&self, mut visit: F) -> Result<(), StorageError>
    where
        F: FnMut(EventRecord) -> bool,
    {
        self.scan_outbox(|row| match row {
            OutboxRow::Event(record) => visit(record),
            OutboxRow::Corrupt(corrupt) => {
                warn!(id = ?corrupt.id, reason = %corrupt.reason, "Skipping undecodable outbox row");
                true
            }
        })
    }

    /// Get up to `limit` outbox rows starting at id `from_id`, oldest first.
    pub fn get_events(&self, from_id: u64, limit: usize) -> Result<Vec<EventRecord>, StorageError> {
        let cf = self.cf(CF_OUTBOX)?;
        let start_key = OutboxKey::new(from_id);
        let iter = self.db.iterator_cf(
            cf,
            IteratorMode::From(&start_key.to_bytes(), Direction::Forward),
        );

        let mut results = Vec::new();
        for item in iter.take(limit) {
            let (key, value) = item?;
            results.push(decode_record(&key, &value)?);
        }
        Ok(results)
    }

    /// Get a single outbox row by id
    pub fn get_event(&self, id: u64) -> Result<Option<EventRecord>, StorageError> {
        let cf = self.cf(CF_OUTBOX)?;
        let key = OutboxKey::new(id).to_bytes();
        match self.db.get_cf(cf, &key)? {
            Some(value) => Ok(Some(decode_record(&key, &value)?)),
            None => Ok(None),
        }
    }

    /// Number of pending outbox rows
    pub fn count_events(&self) -> Result<u64, StorageError> {
        self.count_cf_entries(self.cf(CF_OUTBOX)?)
    }

    /// Administrative purge: delete every pending row matching `filter`.
    ///
    /// Scan and delete happen under the commit lock and the deletes commit in
    /// one batch. A run that read a purged row fails its commit instead of
    /// resurrecting the work. Returns the number of rows deleted.
    pub fn purge_events<F>(&self, filter: F) -> Result<usize, StorageError>
    where
        F: Fn(&EventRecord) -> bool,
    {
        let _guard = self.lock_commits();

        let mut keys = Vec::new();
        self.scan_events(|record| {
            if filter(&record) {
                keys.push(OutboxKey::new(record.id).to_bytes());
            }
            true
        })?;

        if keys.is_empty() {
            return Ok(0);
        }

        let cf = self.cf(CF_OUTBOX)?;
        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(cf, key);
        }
        self.write(batch)?;

        info!(deleted = keys.len(), "Purged outbox events");
        Ok(keys.len())
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(cf)?;
            }
        }
        Ok(())
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            outbox_count: self.count_cf_entries(self.cf(CF_OUTBOX)?)?,
            entity_count: self.count_cf_entries(self.cf(CF_ENTITIES)?)?,
            next_event_id: self.outbox_sequence.load(Ordering::SeqCst),
        })
    }

    fn count_cf_entries(&self, cf: &ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }
}

fn decode_record(key: &[u8], value: &[u8]) -> Result<EventRecord, StorageError> {
    let outbox_key = OutboxKey::from_bytes(key)?;
    let event = OutboxEvent::from_bytes(value).map_err(|e| StorageError::CorruptEvent {
        id: outbox_key.sequence,
        reason: e.to_string(),
    })?;
    Ok(EventRecord::new(outbox_key.sequence, event))
}

/// An outbox row whose key or body cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRow {
    /// Raw key of the row
    pub key: Vec<u8>,
    /// Event id, when the key itself is readable
    pub id: Option<u64>,
    /// Why decoding failed
    pub reason: String,
}

impl CorruptRow {
    fn new(key: &[u8], error: &StorageError) -> Self {
        Self {
            key: key.to_vec(),
            id: OutboxKey::from_bytes(key).ok().map(|k| k.sequence),
            reason: error.to_string(),
        }
    }

    /// Printable form of the raw key.
    pub fn key_display(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

/// One row of the outbox column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxRow {
    /// A decodable event
    Event(EventRecord),
    /// A row that cannot be processed
    Corrupt(CorruptRow),
}

/// Database statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Number of pending outbox rows
    pub outbox_count: u64,
    /// Number of entity rows
    pub entity_count: u64,
    /// Id the next inserted outbox row will receive
    pub next_event_id: u64,
}
