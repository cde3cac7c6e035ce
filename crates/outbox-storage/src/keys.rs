//! Key encoding and decoding for the storage layer.
//!
//! - Outbox rows: `outbox:{sequence:020}`. Zero padding makes lexicographic
//!   key order equal numeric id order, so a forward scan is a FIFO read.
//! - Entities: `entity:{entity_type}:{entity_id}`. The entity type must not
//!   contain ':'; the entity id may.

use crate::error::StorageError;

/// Key for outbox rows
/// Format: outbox:{sequence:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxKey {
    /// Monotonic sequence number; this is the event id
    pub sequence: u64,
}

impl OutboxKey {
    /// Create a new outbox key with given sequence
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("outbox:{:020}", self.sequence).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 2 || parts[0] != "outbox" {
            return Err(StorageError::Key(format!("Invalid outbox key format: {}", s)));
        }

        let sequence: u64 = parts[1]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;

        Ok(Self { sequence })
    }
}

/// Key for entity rows in the system-of-record column family
/// Format: entity:{entity_type}:{entity_id}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityKey {
    /// Logical entity kind
    pub entity_type: String,
    /// Serialized entity id
    pub entity_id: String,
}

impl EntityKey {
    /// Create a key, rejecting entity types that would make the key ambiguous.
    pub fn new(entity_type: &str, entity_id: &str) -> Result<Self, StorageError> {
        if entity_type.is_empty() || entity_type.contains(':') {
            return Err(StorageError::Key(format!(
                "Invalid entity type: {:?}",
                entity_type
            )));
        }
        Ok(Self {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
        })
    }

    /// Encode key to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("entity:{}:{}", self.entity_type, self.entity_id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;

        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("entity"), Some(entity_type), Some(entity_id)) => {
                Self::new(entity_type, entity_id)
            }
            _ => Err(StorageError::Key(format!("Invalid entity key format: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_key_roundtrip() {
        let key = OutboxKey::new(12345);
        let bytes = key.to_bytes();
        let decoded = OutboxKey::from_bytes(&bytes).unwrap();
        assert_eq!(key.sequence, decoded.sequence);
    }

    #[test]
    fn test_outbox_key_lexicographic_order() {
        assert!(OutboxKey::new(9).to_bytes() < OutboxKey::new(10).to_bytes());
        assert!(OutboxKey::new(99).to_bytes() < OutboxKey::new(1000).to_bytes());
    }

    #[test]
    fn test_outbox_key_rejects_garbage() {
        assert!(OutboxKey::from_bytes(b"entity:Book:1").is_err());
        assert!(OutboxKey::from_bytes(b"outbox:abc").is_err());
    }

    #[test]
    fn test_entity_key_id_may_contain_colon() {
        let key = EntityKey::new("Book", "isbn:978-3").unwrap();
        let decoded = EntityKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded.entity_type, "Book");
        assert_eq!(decoded.entity_id, "isbn:978-3");
    }

    #[test]
    fn test_entity_key_rejects_bad_type() {
        assert!(EntityKey::new("", "1").is_err());
        assert!(EntityKey::new("a:b", "1").is_err());
    }
}
