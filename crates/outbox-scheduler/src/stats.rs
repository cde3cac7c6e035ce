//! Processor run statistics.
//!
//! Lock-free counters updated by the processor task and read from anywhere
//! through [`ProcessorStats::snapshot`].

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time copy of [`ProcessorStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStatsSnapshot {
    /// Runs completed, empty or not
    pub runs: u64,
    /// Runs that found no due events
    pub empty_polls: u64,
    /// Events deleted after a successful backend call
    pub events_consumed: u64,
    /// Retry successors persisted
    pub retries_scheduled: u64,
    /// Entities handed to the failure handler
    pub entities_aborted: u64,
    /// Undecodable rows dropped
    pub rows_discarded: u64,
    /// Runs that failed before commit
    pub infrastructure_failures: u64,
    /// When the last run finished
    pub last_run: Option<DateTime<Utc>>,
}

/// Atomic run counters for one processor.
#[derive(Debug, Default)]
pub struct ProcessorStats {
    runs: AtomicU64,
    empty_polls: AtomicU64,
    events_consumed: AtomicU64,
    retries_scheduled: AtomicU64,
    entities_aborted: AtomicU64,
    rows_discarded: AtomicU64,
    infrastructure_failures: AtomicU64,
    /// ms since epoch; 0 = never
    last_run_ms: AtomicI64,
}

impl ProcessorStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_empty_poll(&self) {
        self.empty_polls.fetch_add(1, Ordering::Relaxed);
        self.record_run();
    }

    pub(crate) fn record_batch(&self, consumed: usize, retried: usize, aborted: usize) {
        self.events_consumed
            .fetch_add(consumed as u64, Ordering::Relaxed);
        self.retries_scheduled
            .fetch_add(retried as u64, Ordering::Relaxed);
        self.entities_aborted
            .fetch_add(aborted as u64, Ordering::Relaxed);
        self.record_run();
    }

    /// Count dropped undecodable rows. The run itself is counted by `record_batch`.
    pub(crate) fn record_discarded(&self, discarded: usize) {
        self.rows_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_infrastructure_failure(&self) {
        self.infrastructure_failures.fetch_add(1, Ordering::Relaxed);
        self.record_run();
    }

    fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.last_run_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Copy the current counters.
    pub fn snapshot(&self) -> ProcessorStatsSnapshot {
        let last_run_ms = self.last_run_ms.load(Ordering::Relaxed);
        ProcessorStatsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            events_consumed: self.events_consumed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            entities_aborted: self.entities_aborted.load(Ordering::Relaxed),
            rows_discarded: self.rows_discarded.load(Ordering::Relaxed),
            infrastructure_failures: self.infrastructure_failures.load(Ordering::Relaxed),
            last_run: if last_run_ms == 0 {
                None
            } else {
                Utc.timestamp_millis_opt(last_run_ms).single()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = ProcessorStats::new().snapshot();
        assert_eq!(snapshot, ProcessorStatsSnapshot::default());
        assert!(snapshot.last_run.is_none());
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = ProcessorStats::new();
        stats.record_empty_poll();
        stats.record_batch(3, 1, 0);
        stats.record_batch(0, 0, 2);
        stats.record_discarded(1);
        stats.record_infrastructure_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.runs, 4);
        assert_eq!(snapshot.empty_polls, 1);
        assert_eq!(snapshot.events_consumed, 3);
        assert_eq!(snapshot.retries_scheduled, 1);
        assert_eq!(snapshot.entities_aborted, 2);
        assert_eq!(snapshot.rows_discarded, 1);
        assert_eq!(snapshot.infrastructure_failures, 1);
        assert!(snapshot.last_run.is_some());
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ProcessorStats::new();
        stats.record_batch(1, 0, 0);
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"events_consumed\":1"));
        assert!(json.contains("\"last_run\""));
    }
}
