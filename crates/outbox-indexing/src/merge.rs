//! Retry merging.
//!
//! All failed rows of one entity collapse into a single successor row, or,
//! once the retry budget is spent, into a permanent failure. Merge rules:
//!
//! - operation: `DELETE` only if every failed row is a delete, otherwise
//!   `ADD_OR_UPDATE` (a failed add may have partially reached the backend)
//! - routes: current route of the last failed row; previous routes are every
//!   route seen across the merged rows
//! - retry count: `min(retry_count) + 1`; reaching `max_retries` aborts

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;

use outbox_types::{DocumentRoutes, EntityReference, OutboxEvent, OutboxOperation};

use crate::failure::EntityFailure;
use crate::plan::FailedEntity;

/// Default maximum number of attempts per entity.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// What to do with the failed rows of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeDecision {
    /// Persist this successor in place of the failed rows
    Retry(OutboxEvent),
    /// Drop the failed rows and report the failure
    Abort(EntityFailure),
}

/// Collapses failed rows into successors.
#[derive(Debug, Clone, Copy)]
pub struct RetryMerger {
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for RetryMerger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl RetryMerger {
    /// Create a merger that gives up once `max_retries` attempts failed.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            retry_delay: Duration::ZERO,
        }
    }

    /// Delay successors by `delay` before they become eligible again.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Configured attempt limit.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Merge the failed rows of `reference`.
    pub fn merge(&self, reference: &EntityReference, failed: &FailedEntity) -> MergeDecision {
        self.merge_at(reference, failed, Utc::now().timestamp_millis())
    }

    /// Merge using `now_ms` as the current time.
    pub fn merge_at(
        &self,
        reference: &EntityReference,
        failed: &FailedEntity,
        now_ms: i64,
    ) -> MergeDecision {
        let operation = merged_operation(failed);
        let attempts = failed
            .records
            .iter()
            .map(|r| r.event.retry_count)
            .min()
            .unwrap_or(0)
            .saturating_add(1);

        if attempts >= self.max_retries {
            return MergeDecision::Abort(EntityFailure {
                reference: reference.clone(),
                operation,
                description: format!(
                    "{} of {} failed after {} attempt(s)",
                    operation, reference, attempts
                ),
                cause: failed.cause.clone(),
                attempts,
                event_ids: failed.records.iter().map(|r| r.id).collect(),
            });
        }

        let mut successor = OutboxEvent::new(
            reference.entity_type.clone(),
            reference.entity_id.clone(),
            operation,
            merged_routes(failed),
        )
        .with_retry_count(attempts);

        if !self.retry_delay.is_zero() {
            let delay_ms = i64::try_from(self.retry_delay.as_millis()).unwrap_or(i64::MAX);
            successor = successor.with_process_after(now_ms.saturating_add(delay_ms));
        }

        MergeDecision::Retry(successor)
    }
}

fn merged_operation(failed: &FailedEntity) -> OutboxOperation {
    let all_deletes = failed.records.iter().all(|r| match r.event.operation {
        OutboxOperation::Delete => true,
        OutboxOperation::Add | OutboxOperation::AddOrUpdate => false,
    });
    if all_deletes && !failed.records.is_empty() {
        OutboxOperation::Delete
    } else {
        OutboxOperation::AddOrUpdate
    }
}

fn merged_routes(failed: &FailedEntity) -> DocumentRoutes {
    let current = failed
        .records
        .iter()
        .max_by_key(|r| r.id)
        .and_then(|r| r.event.routes.current.clone());
    let previous: BTreeSet<_> = failed
        .records
        .iter()
        .flat_map(|r| r.event.routes.all_routes())
        .collect();
    DocumentRoutes { current, previous }
}
