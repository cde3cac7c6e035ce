//! Error types for the scheduler crate.
//!
//! Covers processor lifecycle misuse, shutdown timeouts, and failures of a
//! single processor run.

use std::time::Duration;

use outbox_indexing::IndexingError;
use outbox_storage::StorageError;
use thiserror::Error;

/// Errors that can occur during scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Processor is already running
    #[error("Processor is already running")]
    AlreadyRunning,

    /// Processor is not running
    #[error("Processor is not running")]
    NotRunning,

    /// `start` was called outside a Tokio runtime
    #[error("No Tokio runtime available to start the processor")]
    NoRuntime,

    /// The in-flight run did not finish within the shutdown timeout
    #[error("In-flight run did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    /// Invalid processor configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage operation failed during a run
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Finding or processing events failed during a run
    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),
}
