//! Storage transactions.
//!
//! A [`StorageTransaction`] buffers writes in a RocksDB `WriteBatch`.
//! `commit` applies the whole batch atomically; `rollback`, or dropping the
//! transaction, discards it. Entity writes and outbox rows placed in the same
//! transaction therefore become visible together or not at all.
//!
//! Reads are not part of the batch: they go straight to the database and see
//! committed state only. Rows removed through [`StorageTransaction::consume_event`]
//! or [`StorageTransaction::discard_corrupt`] must still exist when the batch
//! is written, otherwise the commit fails with [`StorageError::Conflict`] and
//! nothing is applied.

use rocksdb::WriteBatch;
use tracing::debug;

use outbox_types::OutboxEvent;

use crate::column_families::{CF_ENTITIES, CF_OUTBOX};
use crate::db::{CorruptRow, Storage};
use crate::error::StorageError;
use crate::keys::{EntityKey, OutboxKey};

/// What a committed transaction changed in the outbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Ids of outbox rows inserted
    pub inserted: Vec<u64>,
    /// Ids of outbox rows deleted
    pub deleted: Vec<u64>,
}

/// A unit of work against [`Storage`].
pub struct StorageTransaction<'a> {
    storage: &'a Storage,
    batch: WriteBatch,
    inserted: Vec<u64>,
    deleted: Vec<u64>,
    /// Outbox keys that must still exist at commit
    required: Vec<Vec<u8>>,
}

impl<'a> StorageTransaction<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            batch: WriteBatch::default(),
            inserted: Vec::new(),
            deleted: Vec::new(),
            required: Vec::new(),
        }
    }

    /// Write an entity row.
    pub fn put_entity(
        &mut self,
        entity_type: &str,
        entity_id: &str,
        value: &[u8],
    ) -> Result<(), StorageError> {
        let cf = self.storage.cf(CF_ENTITIES)?;
        let key = EntityKey::new(entity_type, entity_id)?;
        self.batch.put_cf(cf, key.to_bytes(), value);
        Ok(())
    }

    /// Delete an entity row.
    pub fn delete_entity(&mut self, entity_type: &str, entity_id: &str) -> Result<(), StorageError> {
        let cf = self.storage.cf(CF_ENTITIES)?;
        let key = EntityKey::new(entity_type, entity_id)?;
        self.batch.delete_cf(cf, key.to_bytes());
        Ok(())
    }

    /// Insert an outbox row, returning its freshly assigned id.
    ///
    /// Ids are allocated immediately; a rolled-back transaction leaves a gap.
    pub fn insert_event(&mut self, event: &OutboxEvent) -> Result<u64, StorageError> {
        let cf = self.storage.cf(CF_OUTBOX)?;
        let bytes = event
            .to_bytes()
            .map_err(|e| StorageError::EncodeEvent(e.to_string()))?;
        let id = self.storage.next_outbox_sequence();
        self.batch.put_cf(cf, OutboxKey::new(id).to_bytes(), bytes);
        self.inserted.push(id);
        Ok(id)
    }

    /// Delete an outbox row. Deleting a missing row is a no-op at commit.
    pub fn delete_event(&mut self, id: u64) -> Result<(), StorageError> {
        let cf = self.storage.cf(CF_OUTBOX)?;
        self.batch.delete_cf(cf, OutboxKey::new(id).to_bytes());
        self.deleted.push(id);
        Ok(())
    }

    /// Delete an outbox row that was read earlier and is being consumed.
    ///
    /// Unlike [`delete_event`](Self::delete_event), the commit fails if the
    /// row is already gone.
    pub fn consume_event(&mut self, id: u64) -> Result<(), StorageError> {
        self.delete_event(id)?;
        self.required.push(OutboxKey::new(id).to_bytes());
        Ok(())
    }

    /// Delete an undecodable outbox row. The commit fails if the row is already gone.
    pub fn discard_corrupt(&mut self, row: &CorruptRow) -> Result<(), StorageError> {
        let cf = self.storage.cf(CF_OUTBOX)?;
        self.batch.delete_cf(cf, &row.key);
        self.required.push(row.key.clone());
        if let Some(id) = row.id {
            self.deleted.push(id);
        }
        Ok(())
    }

    /// Ids inserted so far in this transaction.
    pub fn inserted_ids(&self) -> &[u64] {
        &self.inserted
    }

    /// Ids deleted so far in this transaction.
    pub fn deleted_ids(&self) -> &[u64] {
        &self.deleted
    }

    /// Whether the transaction holds no writes.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// Atomically apply every buffered write.
    pub fn commit(mut self) -> Result<CommitSummary, StorageError> {
        let batch = std::mem::take(&mut self.batch);
        let summary = CommitSummary {
            inserted: std::mem::take(&mut self.inserted),
            deleted: std::mem::take(&mut self.deleted),
        };
        let required = std::mem::take(&mut self.required);

        {
            let _guard = self.storage.lock_commits();
            for key in &required {
                if !self.storage.outbox_row_exists(key)? {
                    let key = String::from_utf8_lossy(key).into_owned();
                    debug!(key = %key, "Commit rejected, consumed row is gone");
                    return Err(StorageError::Conflict(key));
                }
            }
            if !batch.is_empty() {
                self.storage.write(batch)?;
            }
        }
        debug!(
            inserted = summary.inserted.len(),
            deleted = summary.deleted.len(),
            "Committed storage transaction"
        );
        Ok(summary)
    }

    /// Discard every buffered write.
    pub fn rollback(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if !self.batch.is_empty() {
            debug!(
                inserted = self.inserted.len(),
                deleted = self.deleted.len(),
                "Rolled back storage transaction"
            );
        }
        self.batch.clear();
        self.inserted.clear();
        self.deleted.clear();
        self.required.clear();
    }
}

impl Drop for StorageTransaction<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{DocumentRoutes, OutboxOperation};
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn event(id: &str) -> OutboxEvent {
        OutboxEvent::new("Book", id, OutboxOperation::Add, DocumentRoutes::unrouted())
    }

    #[test]
    fn test_commit_makes_entity_and_event_visible_together() {
        let (storage, _temp) = create_test_storage();

        let mut txn = storage.begin();
        txn.put_entity("Book", "42", b"dune").unwrap();
        let id = txn.insert_event(&event("42")).unwrap();

        // Nothing visible before commit
        assert!(storage.get_entity("Book", "42").unwrap().is_none());
        assert!(storage.get_event(id).unwrap().is_none());

        let summary = txn.commit().unwrap();
        assert_eq!(summary.inserted, vec![id]);

        assert_eq!(storage.get_entity("Book", "42").unwrap(), Some(b"dune".to_vec()));
        assert!(storage.get_event(id).unwrap().is_some());
    }

    #[test]
    fn test_rollback_discards_everything() {
        let (storage, _temp) = create_test_storage();

        let mut txn = storage.begin();
        txn.put_entity("Book", "42", b"dune").unwrap();
        txn.insert_event(&event("42")).unwrap();
        txn.rollback();

        assert!(storage.get_entity("Book", "42").unwrap().is_none());
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_drop_without_commit_discards() {
        let (storage, _temp) = create_test_storage();
        {
            let mut txn = storage.begin();
            txn.insert_event(&event("1")).unwrap();
        }
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_delete_and_insert_in_one_commit() {
        let (storage, _temp) = create_test_storage();

        let mut txn = storage.begin();
        let original = txn.insert_event(&event("1")).unwrap();
        txn.commit().unwrap();

        let mut txn = storage.begin();
        txn.delete_event(original).unwrap();
        let successor = txn.insert_event(&event("1").with_retry_count(1)).unwrap();
        assert_eq!(txn.deleted_ids(), &[original]);
        assert_eq!(txn.inserted_ids(), &[successor]);
        txn.commit().unwrap();

        let events = storage.get_events(0, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, successor);
        assert_eq!(events[0].event.retry_count, 1);
    }

    #[test]
    fn test_deleting_missing_event_is_noop() {
        let (storage, _temp) = create_test_storage();
        let mut txn = storage.begin();
        txn.delete_event(999).unwrap();
        assert!(!txn.is_empty());
        txn.commit().unwrap();
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_consume_fails_when_row_was_purged() {
        let (storage, _temp) = create_test_storage();
        let mut txn = storage.begin();
        let original = txn.insert_event(&event("1")).unwrap();
        txn.commit().unwrap();

        let mut txn = storage.begin();
        txn.consume_event(original).unwrap();
        txn.insert_event(&event("1").with_retry_count(1)).unwrap();

        assert_eq!(storage.purge_events(|_| true).unwrap(), 1);

        match txn.commit() {
            Err(StorageError::Conflict(key)) => assert_eq!(key, "outbox:00000000000000000001"),
            other => panic!("Expected conflict, got {:?}", other),
        }
        // The successor was not written either
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_consume_existing_row_commits() {
        let (storage, _temp) = create_test_storage();
        let mut txn = storage.begin();
        let original = txn.insert_event(&event("1")).unwrap();
        txn.commit().unwrap();

        let mut txn = storage.begin();
        txn.consume_event(original).unwrap();
        let summary = txn.commit().unwrap();
        assert_eq!(summary.deleted, vec![original]);
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_delete_entity() {
        let (storage, _temp) = create_test_storage();
        let mut txn = storage.begin();
        txn.put_entity("Book", "1", b"x").unwrap();
        txn.commit().unwrap();

        let mut txn = storage.begin();
        txn.delete_entity("Book", "1").unwrap();
        txn.commit().unwrap();
        assert!(storage.get_entity("Book", "1").unwrap().is_none());
    }
}
