//! Routing descriptors for indexed documents.
//!
//! A document may move between shards when its routing key changes. The
//! outbox keeps both the current route and every route the document may
//! still occupy, so that a delete or a move reaches all of them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A single shard route. `routing_key = None` is the default route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentRoute {
    /// Routing key, if the index uses custom routing
    #[serde(default)]
    pub routing_key: Option<String>,
}

impl DocumentRoute {
    /// The default (unrouted) route.
    pub fn default_route() -> Self {
        Self { routing_key: None }
    }

    /// A route with an explicit routing key.
    pub fn keyed(routing_key: impl Into<String>) -> Self {
        Self {
            routing_key: Some(routing_key.into()),
        }
    }
}

/// Current and previous routes for one document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentRoutes {
    /// Where the document should live now.
    ///
    /// `None` means the document must not exist at any route any more.
    pub current: Option<DocumentRoute>,

    /// Routes the document may still occupy from earlier writes.
    #[serde(default)]
    pub previous: BTreeSet<DocumentRoute>,
}

impl DocumentRoutes {
    /// Routes for a document living on the default route with no history.
    pub fn unrouted() -> Self {
        Self {
            current: Some(DocumentRoute::default_route()),
            previous: BTreeSet::new(),
        }
    }

    /// Routes for a document with the given current route and no history.
    pub fn current(route: DocumentRoute) -> Self {
        Self {
            current: Some(route),
            previous: BTreeSet::new(),
        }
    }

    /// Add a previous route.
    pub fn with_previous(mut self, route: DocumentRoute) -> Self {
        self.previous.insert(route);
        self
    }

    /// Every route this descriptor mentions, current included.
    pub fn all_routes(&self) -> BTreeSet<DocumentRoute> {
        let mut routes = self.previous.clone();
        if let Some(current) = &self.current {
            routes.insert(current.clone());
        }
        routes
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
