//! Sending plan: the writer side of the outbox.
//!
//! Intents are buffered in memory and written as outbox rows into the
//! writer's own [`StorageTransaction`]. Nothing touches storage until
//! [`SendingPlan::send_and_report`], and the rows only become visible when
//! the writer commits.

use tracing::{debug, warn};

use outbox_storage::StorageTransaction;
use outbox_types::{DocumentRoutes, EntityReference, OutboxEvent, OutboxOperation};

use crate::error::IndexingError;

/// A candidate that could not be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    /// The entity whose event was not sent
    pub reference: EntityReference,
    /// Why it was not sent
    pub cause: String,
}

/// Outcome of [`SendingPlan::send_and_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendingReport {
    /// Ids assigned to the persisted rows, in candidate order
    pub sent: Vec<u64>,
    /// Candidates that were not persisted
    pub failures: Vec<SendFailure>,
}

impl SendingReport {
    /// Whether every candidate was persisted.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turn a report with failures into an error, so the writer can abort
    /// its transaction with `?`.
    pub fn into_result(self) -> Result<Vec<u64>, IndexingError> {
        match self.failures.first() {
            None => Ok(self.sent),
            Some(first) => Err(IndexingError::Send {
                count: self.failures.len(),
                first: format!("{}: {}", first.reference, first.cause),
            }),
        }
    }
}

/// Buffered indexing intents for one writer transaction.
#[derive(Debug, Default)]
pub struct SendingPlan {
    candidates: Vec<OutboxEvent>,
}

impl SendingPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request indexing of a new entity.
    pub fn add(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        routes: DocumentRoutes,
    ) {
        self.push(entity_type, entity_id, OutboxOperation::Add, routes);
    }

    /// Request (re)indexing of an entity.
    pub fn add_or_update(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        routes: DocumentRoutes,
    ) {
        self.push(entity_type, entity_id, OutboxOperation::AddOrUpdate, routes);
    }

    /// Request removal of an entity's document.
    pub fn delete(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        routes: DocumentRoutes,
    ) {
        self.push(entity_type, entity_id, OutboxOperation::Delete, routes);
    }

    fn push(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        operation: OutboxOperation,
        routes: DocumentRoutes,
    ) {
        self.candidates
            .push(OutboxEvent::new(entity_type, entity_id, operation, routes));
    }

    /// Number of buffered candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether no candidate is buffered.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Drop every candidate without persisting. Use when the enclosing
    /// transaction rolls back.
    pub fn discard(&mut self) {
        if !self.candidates.is_empty() {
            debug!(discarded = self.candidates.len(), "Discarded sending plan");
        }
        self.candidates.clear();
    }

    /// Persist every candidate into `txn` and report the ones that failed.
    ///
    /// The plan is empty afterwards. Failed candidates are never written.
    pub fn send_and_report(&mut self, txn: &mut StorageTransaction<'_>) -> SendingReport {
        let mut report = SendingReport::default();

        for event in self.candidates.drain(..) {
            let reference = event.entity_reference();
            if let Err(cause) = validate(&event) {
                warn!(entity = %reference, cause = %cause, "Rejected outbox event");
                report.failures.push(SendFailure { reference, cause });
                continue;
            }

            match txn.insert_event(&event) {
                Ok(id) => {
                    debug!(id, entity = %reference, operation = %event.operation, "Queued outbox event");
                    report.sent.push(id);
                }
                Err(e) => {
                    warn!(entity = %reference, error = %e, "Failed to queue outbox event");
                    report.failures.push(SendFailure {
                        reference,
                        cause: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

fn validate(event: &OutboxEvent) -> Result<(), String> {
    if event.entity_type.is_empty() {
        return Err("empty entity type".to_string());
    }
    if event.entity_id.is_empty() {
        return Err("empty entity id".to_string());
    }
    Ok(())
}
