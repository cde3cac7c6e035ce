//! Mock indexing backend for testing.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use outbox_types::EntityReference;

use crate::backend::{IndexingBackend, IndexingReport, IndexingWork};
use crate::error::IndexingError;

#[derive(Debug, Default)]
struct Script {
    /// Remaining batches in which each entity fails; `None` = always
    entity_failures: HashMap<EntityReference, Option<u32>>,
    /// Remaining whole-batch errors
    batch_failures: u32,
    /// Every work received, in arrival order
    works: Vec<IndexingWork>,
}

/// Scriptable backend that records every work it receives.
///
/// Useful for testing without a real index.
#[derive(Debug, Default)]
pub struct MockBackend {
    script: Mutex<Script>,
    delay: Option<Duration>,
    executions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockBackend {
    /// Create a backend where every work succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report `reference` as failed in the next `batches` calls that contain it.
    pub fn fail_entity(&self, reference: EntityReference, batches: u32) {
        self.script().entity_failures.insert(reference, Some(batches));
    }

    /// Report `reference` as failed in every call.
    pub fn always_fail_entity(&self, reference: EntityReference) {
        self.script().entity_failures.insert(reference, None);
    }

    /// Return an error for the next `batches` calls.
    pub fn fail_next_batches(&self, batches: u32) {
        self.script().batch_failures = batches;
    }

    /// Every work received so far.
    pub fn recorded_works(&self) -> Vec<IndexingWork> {
        self.script().works.clone()
    }

    /// Number of calls to `execute`.
    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IndexingBackend for MockBackend {
    async fn execute(&self, works: Vec<IndexingWork>) -> Result<IndexingReport, IndexingError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script();
        script.works.extend(works.iter().cloned());

        if script.batch_failures > 0 {
            script.batch_failures -= 1;
            return Err(IndexingError::Backend("simulated batch failure".to_string()));
        }

        let mut report = IndexingReport::new();
        let references: BTreeSet<_> = works.into_iter().map(|w| w.reference).collect();
        for reference in references {
            let fails = match script.entity_failures.get_mut(&reference) {
                Some(None) => true,
                Some(Some(remaining)) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            };
            if fails {
                report.record_failure(reference, "simulated failure");
            }
        }

        Ok(report)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{DocumentRoutes, OutboxOperation};

    fn work(entity_id: &str) -> IndexingWork {
        IndexingWork {
            operation: OutboxOperation::AddOrUpdate,
            reference: EntityReference::new("Book", entity_id),
            routes: DocumentRoutes::unrouted(),
        }
    }

    #[tokio::test]
    async fn test_entity_failures_count_down_per_batch() {
        let backend = MockBackend::new();
        backend.fail_entity(EntityReference::new("Book", "42"), 1);

        let report = backend
            .execute(vec![work("42"), work("42"), work("7")])
            .await
            .unwrap();
        assert_eq!(report.failure_count(), 1);

        let report = backend.execute(vec![work("42")]).await.unwrap();
        assert!(report.is_success());
        assert_eq!(backend.recorded_works().len(), 4);
        assert_eq!(backend.execution_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_failures() {
        let backend = MockBackend::new();
        backend.fail_next_batches(1);
        assert!(backend.execute(vec![work("1")]).await.is_err());
        assert!(backend.execute(vec![work("1")]).await.is_ok());
    }

    #[tokio::test]
    async fn test_always_fail() {
        let backend = MockBackend::new();
        backend.always_fail_entity(EntityReference::new("Book", "1"));
        for _ in 0..3 {
            let report = backend.execute(vec![work("1")]).await.unwrap();
            assert!(!report.is_success());
        }
        assert_eq!(backend.max_in_flight(), 1);
    }
}
