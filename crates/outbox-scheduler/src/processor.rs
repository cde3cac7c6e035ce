//! Background processor for the outbox queue.
//!
//! Each run reads a batch of due events, sends it to the indexing backend,
//! then in one storage transaction deletes the consumed events and replaces
//! failed ones with merged retry successors. Undecodable rows met by the
//! finder are deleted in the same transaction and reported to the failure
//! handler. Runs are driven by a [`SingletonTask`], so at most one is in
//! flight per processor.
//!
//! Scheduling after a run:
//! - non-empty batch: run again immediately (drain)
//! - empty batch or failed run: run again after the polling interval
//!
//! A failed run rolls back; the events are still there for the next one. If
//! rows the run consumed were purged while it was in flight, the commit is
//! rejected and the next run starts from the purged state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use outbox_indexing::{
    DefaultEventFinder, EventFinder, FailureHandler, IndexingBackend, LoggingFailureHandler,
    MergeDecision, ProcessingPlan, RetryMerger,
};
use outbox_storage::Storage;

use crate::config::ProcessorConfig;
use crate::singleton::{Reschedule, SingletonTask};
use crate::stats::{ProcessorStats, ProcessorStatsSnapshot};
use crate::SchedulerError;

const STOPPED: u8 = 0;
const STARTED: u8 = 1;
const STOPPING: u8 = 2;

/// Lifecycle state of a processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessorState {
    /// Not running; `start` is allowed
    Stopped,
    /// Runs are being scheduled
    Started,
    /// No new runs; waiting for the in-flight one
    Stopping,
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Events read
    pub fetched: usize,
    /// Events deleted after success
    pub consumed: usize,
    /// Retry successors persisted
    pub retried: usize,
    /// Entities handed to the failure handler
    pub aborted: usize,
    /// Undecodable rows dropped
    pub discarded: usize,
}

struct Inner {
    config: ProcessorConfig,
    storage: Arc<Storage>,
    finder: Arc<dyn EventFinder>,
    plan: ProcessingPlan,
    merger: RetryMerger,
    failure_handler: Arc<dyn FailureHandler>,
    stats: ProcessorStats,
    state: AtomicU8,
    in_flight: AtomicBool,
}

/// Releases the in-flight flag when dropped, even on panic.
struct RunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn state(&self) -> ProcessorState {
        match self.state.load(Ordering::SeqCst) {
            STARTED => ProcessorState::Started,
            STOPPING => ProcessorState::Stopping,
            _ => ProcessorState::Stopped,
        }
    }

    fn try_acquire(&self) -> Option<RunGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                flag: &self.in_flight,
            })
    }

    /// Entry point for the singleton task.
    async fn scheduled_run(&self) -> Reschedule {
        if self.state() != ProcessorState::Started {
            return Reschedule::Never;
        }

        // A manual run holds the flag; try again on the next tick.
        let Some(_guard) = self.try_acquire() else {
            debug!(queue = %self.config.queue_name, "Run already in flight, skipping");
            return Reschedule::After(self.config.polling_interval);
        };

        let span = info_span!("outbox_run", queue = %self.config.queue_name);
        match self.run_recorded().instrument(span).await {
            Ok(summary) if summary.fetched > 0 || summary.discarded > 0 => Reschedule::Now,
            Ok(_) => Reschedule::After(self.config.polling_interval),
            Err(e) => {
                warn!(
                    queue = %self.config.queue_name,
                    error = %e,
                    retry_in_ms = self.config.polling_interval.as_millis() as u64,
                    "Outbox run failed"
                );
                Reschedule::After(self.config.polling_interval)
            }
        }
    }

    async fn run_guarded(&self) -> Result<RunSummary, SchedulerError> {
        let _guard = self.try_acquire().ok_or(SchedulerError::AlreadyRunning)?;
        self.run_recorded().await
    }

    /// Run one batch; the caller holds the in-flight flag.
    async fn run_recorded(&self) -> Result<RunSummary, SchedulerError> {
        let result = self.run_batch().await;
        if result.is_err() {
            self.stats.record_infrastructure_failure();
        }
        result
    }

    async fn run_batch(&self) -> Result<RunSummary, SchedulerError> {
        let batch = self
            .finder
            .find_pending(&self.storage, self.config.batch_size)?;
        if batch.is_empty() {
            debug!("No due outbox events");
            self.stats.record_empty_poll();
            return Ok(RunSummary::default());
        }

        debug!(
            count = batch.records.len(),
            corrupt = batch.corrupt.len(),
            first_id = ?batch.records.first().map(|r| r.id),
            finder = self.finder.name(),
            "Processing outbox batch"
        );

        let outcome = self.plan.process(&batch.records).await;

        let mut summary = RunSummary {
            fetched: batch.records.len(),
            consumed: outcome.consumed.len(),
            discarded: batch.corrupt.len(),
            ..Default::default()
        };
        let mut aborted = Vec::new();

        let mut txn = self.storage.begin();
        for row in &batch.corrupt {
            txn.discard_corrupt(row)?;
        }
        for id in &outcome.consumed {
            txn.consume_event(*id)?;
        }
        for (reference, failed) in &outcome.failures {
            for record in &failed.records {
                txn.consume_event(record.id)?;
            }
            match self.merger.merge(reference, failed) {
                MergeDecision::Retry(successor) => {
                    let successor_id = txn.insert_event(&successor)?;
                    warn!(
                        entity = %reference,
                        successor_id,
                        operation = %successor.operation,
                        retry_count = successor.retry_count,
                        cause = %failed.cause,
                        "Indexing failed, retry scheduled"
                    );
                    summary.retried += 1;
                }
                MergeDecision::Abort(failure) => aborted.push(failure),
            }
        }
        txn.commit()?;

        summary.aborted = aborted.len();
        for row in &batch.corrupt {
            self.failure_handler.handle_corrupt(row);
        }
        for failure in &aborted {
            self.failure_handler.handle(failure);
        }

        self.stats.record_discarded(summary.discarded);
        self.stats
            .record_batch(summary.consumed, summary.retried, summary.aborted);
        info!(
            fetched = summary.fetched,
            consumed = summary.consumed,
            retried = summary.retried,
            aborted = summary.aborted,
            discarded = summary.discarded,
            "Processed outbox batch"
        );
        Ok(summary)
    }
}

/// Builder for [`BackgroundProcessor`].
pub struct BackgroundProcessorBuilder {
    storage: Arc<Storage>,
    backend: Arc<dyn IndexingBackend>,
    config: ProcessorConfig,
    finder: Option<Arc<dyn EventFinder>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
}

impl BackgroundProcessorBuilder {
    /// Set the processor configuration.
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom event finder (defaults to [`DefaultEventFinder`]).
    pub fn with_finder(mut self, finder: Arc<dyn EventFinder>) -> Self {
        self.finder = Some(finder);
        self
    }

    /// Use a custom failure handler (defaults to [`LoggingFailureHandler`]).
    pub fn with_failure_handler(mut self, handler: Arc<dyn FailureHandler>) -> Self {
        self.failure_handler = Some(handler);
        self
    }

    /// Build a stopped processor.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the configuration is invalid.
    pub fn build(self) -> Result<BackgroundProcessor, SchedulerError> {
        self.config.validate()?;

        let merger =
            RetryMerger::new(self.config.max_retries).with_retry_delay(self.config.retry_delay);
        let task = SingletonTask::new(
            self.config.queue_name.clone(),
            self.config.polling_interval,
        );

        Ok(BackgroundProcessor {
            inner: Arc::new(Inner {
                storage: self.storage,
                finder: self.finder.unwrap_or_else(|| Arc::new(DefaultEventFinder)),
                plan: ProcessingPlan::new(self.backend),
                merger,
                failure_handler: self
                    .failure_handler
                    .unwrap_or_else(|| Arc::new(LoggingFailureHandler)),
                stats: ProcessorStats::new(),
                state: AtomicU8::new(STOPPED),
                in_flight: AtomicBool::new(false),
                config: self.config,
            }),
            task,
        })
    }
}

/// Single-flight background processor for one outbox queue.
pub struct BackgroundProcessor {
    inner: Arc<Inner>,
    task: SingletonTask,
}

impl BackgroundProcessor {
    /// Start building a processor over `storage` and `backend`.
    pub fn builder(
        storage: Arc<Storage>,
        backend: Arc<dyn IndexingBackend>,
    ) -> BackgroundProcessorBuilder {
        BackgroundProcessorBuilder {
            storage,
            backend,
            config: ProcessorConfig::default(),
            finder: None,
            failure_handler: None,
        }
    }

    /// Start scheduling runs on the current Tokio runtime. The first run is
    /// scheduled immediately.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` unless the processor is
    /// stopped, and `SchedulerError::NoRuntime` outside a Tokio runtime.
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self
            .inner
            .state
            .compare_exchange(STOPPED, STARTED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::AlreadyRunning);
        }

        let inner = self.inner.clone();
        let started = self.task.start(move || {
            let inner = inner.clone();
            async move { inner.scheduled_run().await }
        });
        if let Err(e) = started {
            self.inner.state.store(STOPPED, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            queue = %self.inner.config.queue_name,
            finder = self.inner.finder.name(),
            backend = self.inner.plan.backend_name(),
            batch_size = self.inner.config.batch_size,
            polling_interval_ms = self.inner.config.polling_interval.as_millis() as u64,
            max_retries = self.inner.config.max_retries,
            "Background processor started"
        );
        self.task.ensure_scheduled();
        Ok(())
    }

    /// Request a run as soon as possible. No-op unless started.
    ///
    /// Writers may call this after committing new events.
    pub fn ensure_scheduled(&self) {
        if self.inner.state() == ProcessorState::Started {
            self.task.ensure_scheduled();
        }
    }

    /// Stop scheduling runs and wait for the in-flight one.
    ///
    /// The processor stays in [`ProcessorState::Stopping`] until
    /// [`stop`](Self::stop).
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the processor is stopped and
    /// `SchedulerError::ShutdownTimeout` if the in-flight run outlives the
    /// configured shutdown timeout. The run is not interrupted; calling
    /// `pre_stop` again resumes waiting.
    pub async fn pre_stop(&self) -> Result<(), SchedulerError> {
        match self.inner.state.compare_exchange(
            STARTED,
            STOPPING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => info!(queue = %self.inner.config.queue_name, "Stopping background processor"),
            Err(STOPPING) => {}
            Err(_) => return Err(SchedulerError::NotRunning),
        }

        self.task.shutdown(self.inner.config.shutdown_timeout).await?;
        debug!(queue = %self.inner.config.queue_name, "Background processor drained");
        Ok(())
    }

    /// Stop the processor, waiting for the in-flight run.
    ///
    /// # Errors
    ///
    /// Same as [`pre_stop`](Self::pre_stop).
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        self.pre_stop().await?;
        self.inner.state.store(STOPPED, Ordering::SeqCst);
        info!(queue = %self.inner.config.queue_name, "Background processor stopped");
        Ok(())
    }

    /// Execute one run on the caller's task.
    ///
    /// Only allowed while stopped, so it never overlaps a scheduled run.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` unless stopped, or the error
    /// that failed the run (which is then rolled back).
    pub async fn run_once(&self) -> Result<RunSummary, SchedulerError> {
        if self.inner.state() != ProcessorState::Stopped {
            return Err(SchedulerError::AlreadyRunning);
        }
        let span = info_span!("outbox_run", queue = %self.inner.config.queue_name);
        self.inner.run_guarded().instrument(span).await
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessorState {
        self.inner.state()
    }

    /// Run statistics.
    pub fn stats(&self) -> ProcessorStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Processor configuration.
    pub fn config(&self) -> &ProcessorConfig {
        &self.inner.config
    }
}
