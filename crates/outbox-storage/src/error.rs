//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family missing from the opened database
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Malformed entity or outbox key
    #[error("Key error: {0}")]
    Key(String),

    /// An outbox event could not be encoded for writing
    #[error("Failed to encode outbox event: {0}")]
    EncodeEvent(String),

    /// A stored outbox row could not be decoded
    #[error("Corrupt outbox row {id}: {reason}")]
    CorruptEvent { id: u64, reason: String },

    /// A row this transaction consumes was removed by another writer
    #[error("Outbox row already removed: {0}")]
    Conflict(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_event_display() {
        let err = StorageError::CorruptEvent {
            id: 12,
            reason: "missing field `operation`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Corrupt outbox row 12: missing field `operation`"
        );
    }
}
