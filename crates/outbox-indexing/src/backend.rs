//! Indexing backend contract.
//!
//! The backend is whatever maintains the search index. The outbox hands it
//! a batch of works and expects back, per entity, whether the work failed.
//! Building documents from entities is entirely the backend's business.

use std::collections::BTreeMap;

use async_trait::async_trait;

use outbox_types::{DocumentRoutes, EntityReference, OutboxOperation};

use crate::error::IndexingError;

/// One indexing operation for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingWork {
    /// What to do with the document
    pub operation: OutboxOperation,
    /// The entity the document is built from
    pub reference: EntityReference,
    /// Where the document lives now and previously
    pub routes: DocumentRoutes,
}

/// Ordered batch of works, built before a single backend call.
#[derive(Debug, Clone, Default)]
pub struct BackendPlan {
    works: Vec<IndexingWork>,
}

impl BackendPlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a new document.
    pub fn add(&mut self, reference: EntityReference, routes: DocumentRoutes) {
        self.push(OutboxOperation::Add, reference, routes);
    }

    /// Index a document, replacing any existing version.
    pub fn add_or_update(&mut self, reference: EntityReference, routes: DocumentRoutes) {
        self.push(OutboxOperation::AddOrUpdate, reference, routes);
    }

    /// Delete a document from every route it may occupy.
    pub fn delete(&mut self, reference: EntityReference, routes: DocumentRoutes) {
        self.push(OutboxOperation::Delete, reference, routes);
    }

    fn push(&mut self, operation: OutboxOperation, reference: EntityReference, routes: DocumentRoutes) {
        self.works.push(IndexingWork {
            operation,
            reference,
            routes,
        });
    }

    /// Number of works in the plan.
    pub fn len(&self) -> usize {
        self.works.len()
    }

    /// Whether the plan holds no works.
    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }

    /// Consume the plan, yielding works in insertion order.
    pub fn into_works(self) -> Vec<IndexingWork> {
        self.works
    }
}

/// Outcome of a backend call: the entities whose work failed, with causes.
///
/// Entities not listed succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingReport {
    failures: BTreeMap<EntityReference, String>,
}

impl IndexingReport {
    /// Create a report with no failures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the work for `reference` failed.
    pub fn record_failure(&mut self, reference: EntityReference, cause: impl Into<String>) {
        self.failures.insert(reference, cause.into());
    }

    /// Cause of the failure for `reference`, if it failed.
    pub fn failure_for(&self, reference: &EntityReference) -> Option<&str> {
        self.failures.get(reference).map(String::as_str)
    }

    /// Whether every work succeeded.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of failed entities.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Iterate over failed entities and their causes.
    pub fn failures(&self) -> impl Iterator<Item = (&EntityReference, &str)> {
        self.failures.iter().map(|(reference, cause)| (reference, cause.as_str()))
    }
}

/// Trait for the external indexing backend.
///
/// Implementations apply every work in the batch, in order, and report the
/// entities that failed. Returning `Err` means the batch as a whole could
/// not be applied; every entity in it is then treated as failed.
#[async_trait]
pub trait IndexingBackend: Send + Sync {
    /// Apply a batch of works.
    async fn execute(&self, works: Vec<IndexingWork>) -> Result<IndexingReport, IndexingError>;

    /// Get the name of this backend for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_keeps_order_and_operation() {
        let mut plan = BackendPlan::new();
        plan.add(EntityReference::new("Book", "1"), DocumentRoutes::unrouted());
        plan.delete(EntityReference::new("Book", "1"), DocumentRoutes::unrouted());
        plan.add_or_update(EntityReference::new("Book", "2"), DocumentRoutes::unrouted());

        assert_eq!(plan.len(), 3);
        let ops: Vec<_> = plan.into_works().into_iter().map(|w| w.operation).collect();
        assert_eq!(
            ops,
            vec![
                OutboxOperation::Add,
                OutboxOperation::Delete,
                OutboxOperation::AddOrUpdate
            ]
        );
    }

    #[test]
    fn test_report_failures() {
        let mut report = IndexingReport::new();
        assert!(report.is_success());

        report.record_failure(EntityReference::new("Book", "42"), "mapping exploded");
        assert!(!report.is_success());
        assert_eq!(report.failure_count(), 1);
        assert_eq!(
            report.failure_for(&EntityReference::new("Book", "42")),
            Some("mapping exploded")
        );
        assert!(report.failure_for(&EntityReference::new("Book", "43")).is_none());
    }
}
