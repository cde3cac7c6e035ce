//! Error types for outbox processing.

use outbox_storage::StorageError;
use thiserror::Error;

/// Errors that can occur while sending or processing outbox events
#[derive(Error, Debug)]
pub enum IndexingError {
    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The indexing backend rejected or failed a whole batch
    #[error("Backend error: {0}")]
    Backend(String),

    /// An indexing intent was malformed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// One or more events could not be sent
    #[error("Failed to send {count} outbox event(s): {first}")]
    Send {
        /// Number of failed candidates
        count: usize,
        /// Description of the first failure
        first: String,
    },
}
