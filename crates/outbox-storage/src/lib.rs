//! Storage layer for the search outbox.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation between entities and the outbox table
//! - Zero-padded sequence keys so key order equals event id order
//! - Store-assigned, monotonically increasing event ids
//! - Atomic transactions via WriteBatch: entity writes and outbox rows
//!   commit together or not at all

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod transaction;

pub use db::{CorruptRow, OutboxRow, Storage, StorageStats};
pub use error::StorageError;
pub use keys::{EntityKey, OutboxKey};
pub use transaction::{CommitSummary, StorageTransaction};
