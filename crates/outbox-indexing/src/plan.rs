//! Processing plan: one backend call per batch.
//!
//! Translates a batch of outbox rows into indexing works, executes them as a
//! single request and classifies every row as consumed or failed. A backend
//! that errors out before producing a report fails the whole batch, so work
//! is retried rather than dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use outbox_types::{EntityReference, EventRecord, OutboxOperation};

use crate::backend::{BackendPlan, IndexingBackend};

/// Failed rows for one entity, in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntity {
    /// The rows that failed, oldest first
    pub records: Vec<EventRecord>,
    /// Cause reported by the backend
    pub cause: String,
}

/// Result of processing one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingOutcome {
    /// Ids of rows whose work succeeded
    pub consumed: Vec<u64>,
    /// Failed rows grouped by entity
    pub failures: BTreeMap<EntityReference, FailedEntity>,
}

impl ProcessingOutcome {
    /// Whether every row in the batch succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed rows across all entities.
    pub fn failed_record_count(&self) -> usize {
        self.failures.values().map(|f| f.records.len()).sum()
    }

    fn fail(&mut self, record: &EventRecord, cause: &str) {
        self.failures
            .entry(record.entity_reference())
            .or_insert_with(|| FailedEntity {
                records: Vec::new(),
                cause: cause.to_string(),
            })
            .records
            .push(record.clone());
    }
}

/// Executes batches against an [`IndexingBackend`].
#[derive(Clone)]
pub struct ProcessingPlan {
    backend: Arc<dyn IndexingBackend>,
}

impl ProcessingPlan {
    /// Create a plan over the given backend.
    pub fn new(backend: Arc<dyn IndexingBackend>) -> Self {
        Self { backend }
    }

    /// Name of the backend, for logging.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Process a batch, oldest row first.
    ///
    /// Never fails: a backend error is folded into the outcome as a failure
    /// of every row in the batch.
    pub async fn process(&self, batch: &[EventRecord]) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome::default();
        if batch.is_empty() {
            return outcome;
        }

        let mut plan = BackendPlan::new();
        for record in batch {
            let reference = record.entity_reference();
            let routes = record.event.routes.clone();
            match record.event.operation {
                OutboxOperation::Add => plan.add(reference, routes),
                OutboxOperation::AddOrUpdate => plan.add_or_update(reference, routes),
                OutboxOperation::Delete => plan.delete(reference, routes),
            }
        }

        debug!(
            backend = self.backend.name(),
            works = plan.len(),
            "Executing backend plan"
        );

        match self.backend.execute(plan.into_works()).await {
            Ok(report) => {
                for record in batch {
                    match report.failure_for(&record.entity_reference()) {
                        Some(cause) => outcome.fail(record, cause),
                        None => outcome.consumed.push(record.id),
                    }
                }
            }
            Err(e) => {
                warn!(
                    backend = self.backend.name(),
                    records = batch.len(),
                    error = %e,
                    "Backend failed the whole batch"
                );
                let cause = e.to_string();
                for record in batch {
                    outcome.fail(record, &cause);
                }
            }
        }

        outcome
    }
}
