//! Permanent failure reporting.
//!
//! Once an entity's retry budget is exhausted its events are dropped from the
//! queue and a [`FailureHandler`] is told about it. Undecodable outbox rows
//! are dropped and reported the same way. These are the only paths on which
//! an index update is knowingly lost.

use std::sync::{Mutex, PoisonError};

use tracing::error;

use outbox_storage::CorruptRow;
use outbox_types::{EntityReference, OutboxOperation};

/// An entity whose indexing gave up after `attempts` tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    /// The entity that could not be indexed
    pub reference: EntityReference,
    /// Operation that was being attempted on the last try
    pub operation: OutboxOperation,
    /// Human-readable description of the failing operation
    pub description: String,
    /// Cause reported for the last attempt
    pub cause: String,
    /// Number of attempts made, the final one included
    pub attempts: u32,
    /// Ids of the outbox rows dropped with this failure
    pub event_ids: Vec<u64>,
}

/// Receives entities whose retry budget is exhausted.
///
/// Called on the processor task, once per entity, after the run that drops
/// the failed rows has committed. Implementations must not block for long.
pub trait FailureHandler: Send + Sync {
    /// Handle one permanent failure.
    fn handle(&self, failure: &EntityFailure);

    /// Handle an outbox row that was dropped because it cannot be decoded.
    fn handle_corrupt(&self, row: &CorruptRow) {
        error!(
            key = %row.key_display(),
            reason = %row.reason,
            "Dropped undecodable outbox row"
        );
    }
}

/// Default handler: logs every permanent failure at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFailureHandler;

impl FailureHandler for LoggingFailureHandler {
    fn handle(&self, failure: &EntityFailure) {
        error!(
            entity = %failure.reference,
            operation = %failure.operation,
            attempts = failure.attempts,
            event_ids = ?failure.event_ids,
            cause = %failure.cause,
            "{}",
            failure.description
        );
    }
}

/// Handler that keeps every failure it receives. Intended for tests.
#[derive(Debug, Default)]
pub struct RecordingFailureHandler {
    failures: Mutex<Vec<EntityFailure>>,
    corrupt_rows: Mutex<Vec<CorruptRow>>,
}

impl RecordingFailureHandler {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Failures received so far, in arrival order.
    pub fn failures(&self) -> Vec<EntityFailure> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of failures received so far.
    pub fn count(&self) -> usize {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Undecodable rows reported so far.
    pub fn corrupt_rows(&self) -> Vec<CorruptRow> {
        self.corrupt_rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl FailureHandler for RecordingFailureHandler {
    fn handle(&self, failure: &EntityFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.clone());
    }

    fn handle_corrupt(&self, row: &CorruptRow) {
        self.corrupt_rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(row.clone());
    }
}
