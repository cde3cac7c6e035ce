//! Entity reference: the key pending operations are grouped by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies the entity an outbox event targets.
///
/// A value type with structural equality; it never owns or points at the
/// live entity. Events are merged on retry and failures are reported per
/// reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityReference {
    /// Logical name of the entity kind (e.g. "Book")
    pub entity_type: String,
    /// Serialized identifier, opaque to the outbox
    pub entity_id: String,
}

impl EntityReference {
    /// Create a new reference.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.entity_id)
    }
}
