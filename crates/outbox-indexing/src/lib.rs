//! Outbox processing for the search outbox.
//!
//! This crate turns outbox rows into indexing operations and back:
//! writers record intents, a background worker applies them to the
//! indexing backend, and failures are merged and retried.
//!
//! ## Key Components
//!
//! - [`SendingPlan`]: Collects indexing intents and persists them inside the
//!   writer's own storage transaction
//! - [`EventFinder`]: Selects the next ordered batch of pending rows
//!   ([`DefaultEventFinder`], [`PredicateEventFinder`], [`ShardAssignment`])
//! - [`IndexingBackend`]: The external index, fed with [`IndexingWork`] batches
//! - [`ProcessingPlan`]: Executes a batch and splits it into consumed ids and
//!   failed entities
//! - [`RetryMerger`]: Collapses the failed rows of one entity into a single
//!   successor, or gives up after `max_retries`
//! - [`FailureHandler`]: Receives entities whose retry budget is exhausted
//!
//! ## Example
//!
//! ```ignore
//! use outbox_indexing::{SendingPlan, ProcessingPlan, RetryMerger};
//!
//! // Writer side, inside the business transaction
//! let mut txn = storage.begin();
//! txn.put_entity("Book", "42", &book_bytes)?;
//! let mut plan = SendingPlan::new();
//! plan.add("Book", "42", routes);
//! plan.send_and_report(&mut txn).into_result()?;
//! txn.commit()?;
//!
//! // Worker side
//! let batch = DefaultEventFinder.find_pending(&storage, 50)?;
//! let outcome = ProcessingPlan::new(backend).process(&batch.records).await;
//! ```

pub mod backend;
pub mod error;
pub mod failure;
pub mod finder;
pub mod merge;
pub mod mock;
pub mod plan;
pub mod sending;

pub use backend::{BackendPlan, IndexingBackend, IndexingReport, IndexingWork};
pub use error::IndexingError;
pub use failure::{EntityFailure, FailureHandler, LoggingFailureHandler, RecordingFailureHandler};
pub use finder::{
    DefaultEventFinder, EventFinder, PendingBatch, PredicateEventFinder, ShardAssignment,
};
pub use merge::{MergeDecision, RetryMerger};
pub use mock::MockBackend;
pub use plan::{FailedEntity, ProcessingOutcome, ProcessingPlan};
pub use sending::{SendFailure, SendingPlan, SendingReport};
