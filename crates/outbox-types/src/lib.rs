//! # outbox-types
//!
//! Shared domain types for the search outbox.
//!
//! This crate defines the core data structures used throughout the system:
//! - Event records: durable intents to reindex one entity
//! - Entity references: the `(entity_type, entity_id)` key events are grouped by
//! - Document routes: where a document lives in the index now and previously
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use outbox_types::{DocumentRoutes, OutboxEvent, OutboxOperation};
//!
//! let event = OutboxEvent::new("Book", "42", OutboxOperation::Add, DocumentRoutes::unrouted());
//! assert_eq!(event.retry_count, 0);
//! ```

pub mod config;
pub mod entity;
pub mod error;
pub mod outbox;
pub mod routes;

pub use config::{ProcessorSettings, Settings, ShardingSettings};
pub use entity::EntityReference;
pub use error::OutboxError;
pub use outbox::{EventRecord, OutboxEvent, OutboxOperation};
pub use routes::{DocumentRoute, DocumentRoutes};
