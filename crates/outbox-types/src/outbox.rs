//! Outbox event types for async index updates.
//!
//! Outbox events are written in the same storage transaction as the entity
//! change they describe. A background processor later turns them into
//! indexing operations.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::entity::EntityReference;
use crate::routes::DocumentRoutes;

/// Kind of indexing operation requested for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxOperation {
    /// Index a document that is not expected to exist yet
    Add,
    /// Index a document, replacing any existing version
    AddOrUpdate,
    /// Remove the document from every route it may occupy
    Delete,
}

impl fmt::Display for OutboxOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxOperation::Add => write!(f, "ADD"),
            OutboxOperation::AddOrUpdate => write!(f, "ADD_OR_UPDATE"),
            OutboxOperation::Delete => write!(f, "DELETE"),
        }
    }
}

/// Persisted body of an outbox row.
///
/// The row id is assigned by storage and lives in the key, see [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Logical name of the entity kind
    pub entity_type: String,

    /// Serialized entity identifier
    pub entity_id: String,

    /// What should happen to the document
    pub operation: OutboxOperation,

    /// Current and previous routes of the document
    pub routes: DocumentRoutes,

    /// Number of failed attempts this event carries forward
    #[serde(default)]
    pub retry_count: u32,

    /// Earliest time (ms since epoch) this event may be processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_after_ms: Option<i64>,

    /// When the event was created (ms since epoch)
    pub created_at_ms: i64,
}

impl OutboxEvent {
    /// Create a fresh event with `retry_count = 0`.
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: OutboxOperation,
        routes: DocumentRoutes,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            operation,
            routes,
            retry_count: 0,
            process_after_ms: None,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Set the retry count.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Delay processing until the given time (ms since epoch).
    pub fn with_process_after(mut self, process_after_ms: i64) -> Self {
        self.process_after_ms = Some(process_after_ms);
        self
    }

    /// The entity this event targets.
    pub fn entity_reference(&self) -> EntityReference {
        EntityReference::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Whether the event may be processed at `now_ms`.
    pub fn is_due(&self, now_ms: i64) -> bool {
        self.process_after_ms.map_or(true, |after| after <= now_ms)
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// An outbox row as read back from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    /// Store-assigned, monotonically increasing id; defines processing order
    pub id: u64,
    /// The persisted event body
    pub event: OutboxEvent,
}

impl EventRecord {
    /// Pair an id with its event body.
    pub fn new(id: u64, event: OutboxEvent) -> Self {
        Self { id, event }
    }

    /// The entity this record targets.
    pub fn entity_reference(&self) -> EntityReference {
        self.event.entity_reference()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::DocumentRoute;

    #[test]
    fn test_new_event_defaults() {
        let event = OutboxEvent::new("Book", "42", OutboxOperation::Add, DocumentRoutes::unrouted());
        assert_eq!(event.retry_count, 0);
        assert!(event.process_after_ms.is_none());
        assert_eq!(event.entity_reference(), EntityReference::new("Book", "42"));
    }

    #[test]
    fn test_operation_wire_names() {
        assert_eq!(serde_json::to_string(&OutboxOperation::Add).unwrap(), "\"ADD\"");
        assert_eq!(
            serde_json::to_string(&OutboxOperation::AddOrUpdate).unwrap(),
            "\"ADD_OR_UPDATE\""
        );
        assert_eq!(serde_json::to_string(&OutboxOperation::Delete).unwrap(), "\"DELETE\"");

        let op: OutboxOperation = serde_json::from_str("\"ADD_OR_UPDATE\"").unwrap();
        assert_eq!(op, OutboxOperation::AddOrUpdate);
        assert_eq!(op.to_string(), "ADD_OR_UPDATE");
    }

    #[test]
    fn test_event_roundtrip() {
        let event = OutboxEvent::new(
            "Book",
            "42",
            OutboxOperation::Delete,
            DocumentRoutes::current(DocumentRoute::keyed("b"))
                .with_previous(DocumentRoute::keyed("a")),
        )
        .with_retry_count(2);

        let decoded = OutboxEvent::from_bytes(&event.to_bytes().unwrap()).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_is_due() {
        let event = OutboxEvent::new("Book", "1", OutboxOperation::Add, DocumentRoutes::unrouted());
        assert!(event.is_due(0));

        let delayed = event.with_process_after(1_000);
        assert!(!delayed.is_due(999));
        assert!(delayed.is_due(1_000));
    }

    #[test]
    fn test_process_after_omitted_when_absent() {
        let event = OutboxEvent::new("Book", "1", OutboxOperation::Add, DocumentRoutes::unrouted());
        let json = String::from_utf8(event.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("process_after_ms"));
        assert!(json.contains("\"retry_count\":0"));
    }
}
