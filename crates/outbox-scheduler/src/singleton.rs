//! Singleton task: a recurring unit of work with at most one execution in
//! flight.
//!
//! Callers request executions with [`SingletonTask::ensure_scheduled`], from
//! any thread and as often as they like. A single worker loop executes the
//! work; each execution returns a [`Reschedule`] telling the loop when to run
//! again. State transitions are compare-and-set on one atomic:
//!
//! ```text
//! IDLE ──ensure_scheduled──▶ SCHEDULED ──loop──▶ RUNNING ──done──▶ IDLE
//!                                                   │
//!                                    ensure_scheduled
//!                                                   ▼
//!                                             RUNNING_RERUN ──done──▶ SCHEDULED
//! ```
//!
//! A delayed reschedule is a timer owned by the loop; the state stays `IDLE`
//! while it is pending, so an explicit `ensure_scheduled` still runs the work
//! right away.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::SchedulerError;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const RUNNING_RERUN: u8 = 3;

/// When the work wants to run next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reschedule {
    /// Run again as soon as this execution completes
    Now,
    /// Run again after the given delay, unless scheduled earlier
    After(Duration),
    /// Wait for the next explicit `ensure_scheduled`
    Never,
}

/// Observable state of a singleton task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Nothing queued (a delayed run may be pending)
    Idle,
    /// An execution is queued and will start shortly
    Scheduled,
    /// An execution is in flight
    Running,
    /// An execution is in flight and another was requested
    RunningRerun,
}

struct Shared {
    state: AtomicU8,
    wake: Notify,
}

impl Shared {
    fn ensure_scheduled(&self) {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let next = match current {
                IDLE => SCHEDULED,
                RUNNING => RUNNING_RERUN,
                _ => return,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => {
                    if next == SCHEDULED {
                        self.wake.notify_one();
                    }
                    return;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Claim the next execution. A timer may start from `IDLE`; a wake-up
    /// needs a queued request, otherwise it is spurious.
    fn begin(&self, from_timer: bool) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let eligible = current == SCHEDULED || (from_timer && current == IDLE);
            if !eligible {
                return false;
            }
            match self
                .state
                .compare_exchange(current, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Leave the running state. Returns whether to run again immediately.
    fn finish(&self, rerun_requested: bool) -> bool {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let rerun = rerun_requested || current == RUNNING_RERUN;
            let next = if rerun { SCHEDULED } else { IDLE };
            match self
                .state
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return rerun,
                Err(actual) => current = actual,
            }
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// A recurring task with single-flight execution.
pub struct SingletonTask {
    name: String,
    panic_delay: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl SingletonTask {
    /// Create a stopped task. After a panic the work is retried once
    /// `panic_delay` has elapsed.
    pub fn new(name: impl Into<String>, panic_delay: Duration) -> Self {
        Self {
            name: name.into(),
            panic_delay,
            shared: Arc::new(Shared {
                state: AtomicU8::new(IDLE),
                wake: Notify::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn the worker loop on the current Tokio runtime.
    ///
    /// Nothing runs until the first [`ensure_scheduled`](Self::ensure_scheduled).
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NoRuntime` outside a Tokio runtime and
    /// `SchedulerError::AlreadyRunning` if the loop is already spawned.
    pub fn start<F, Fut>(&self, work: F) -> Result<(), SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Reschedule> + Send + 'static,
    {
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        let mut worker = self.worker();
        if worker.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        self.shared.state.store(IDLE, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run_loop(
            self.name.clone(),
            self.panic_delay,
            self.shared.clone(),
            cancel.clone(),
            work,
        ));
        *worker = Some(Worker { cancel, handle });

        debug!(task = %self.name, "Singleton task started");
        Ok(())
    }

    /// Request an execution.
    ///
    /// Idempotent: queues one if nothing is queued or running, asks for an
    /// immediate rerun if one is in flight, and does nothing if one is
    /// already queued.
    pub fn ensure_scheduled(&self) {
        self.shared.ensure_scheduled();
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        match self.shared.state.load(Ordering::SeqCst) {
            SCHEDULED => TaskState::Scheduled,
            RUNNING => TaskState::Running,
            RUNNING_RERUN => TaskState::RunningRerun,
            _ => TaskState::Idle,
        }
    }

    /// Whether the worker loop is spawned.
    pub fn is_active(&self) -> bool {
        self.worker().is_some()
    }

    /// Stop the worker loop, waiting up to `timeout` for the in-flight
    /// execution. An execution is never interrupted.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::ShutdownTimeout` if the execution is still
    /// running after `timeout`. The loop stays registered, so shutdown can
    /// be awaited again.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), SchedulerError> {
        let taken = self.worker().take();
        let Some(mut worker) = taken else {
            return Ok(());
        };

        worker.cancel.cancel();
        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(Ok(())) => {
                debug!(task = %self.name, "Singleton task stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(task = %self.name, error = %e, "Singleton task ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(
                    task = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "In-flight execution still running after shutdown timeout"
                );
                *self.worker() = Some(worker);
                Err(SchedulerError::ShutdownTimeout(timeout))
            }
        }
    }
}

impl Drop for SingletonTask {
    fn drop(&mut self) {
        if let Some(worker) = self.worker().as_ref() {
            worker.cancel.cancel();
        }
    }
}

async fn run_loop<F, Fut>(
    name: String,
    panic_delay: Duration,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    mut work: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Reschedule> + Send + 'static,
{
    let mut deadline: Option<Instant> = None;
    let mut run_now = false;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = if run_now {
            run_now = false;
            shared.begin(false)
        } else {
            let timer = sleep_until(deadline.unwrap_or_else(Instant::now));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = shared.wake.notified() => shared.begin(false),
                _ = timer, if deadline.is_some() => shared.begin(true),
            }
        };
        if !started {
            continue;
        }
        deadline = None;

        let reschedule = match AssertUnwindSafe(work()).catch_unwind().await {
            Ok(reschedule) => reschedule,
            Err(panic) => {
                error!(task = %name, panic = %panic_message(panic.as_ref()), "Task execution panicked");
                Reschedule::After(panic_delay)
            }
        };

        if shared.finish(reschedule == Reschedule::Now) {
            run_now = true;
        } else if let Reschedule::After(delay) = reschedule {
            deadline = Some(Instant::now() + delay);
        }
    }

    shared.state.store(IDLE, Ordering::SeqCst);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
