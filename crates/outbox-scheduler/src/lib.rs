//! Background processing for the search outbox.
//!
//! This crate drives the outbox queue: a [`SingletonTask`] guarantees that
//! at most one [`BackgroundProcessor`] run is in flight, drains the backlog
//! with immediate reruns while batches are non-empty, and falls back to
//! polling when the queue is idle.
//!
//! # Example
//!
//! ```ignore
//! use outbox_scheduler::{BackgroundProcessor, ProcessorConfig};
//!
//! let config = ProcessorConfig::from_settings(&settings.processor)?;
//! let processor = BackgroundProcessor::builder(storage.clone(), backend)
//!     .with_config(config)
//!     .build()?;
//!
//! processor.start()?;
//!
//! // After a writer commits new events
//! processor.ensure_scheduled();
//!
//! // On shutdown
//! processor.stop().await?;
//! ```

mod config;
mod error;
mod processor;
mod singleton;
mod stats;

pub use config::ProcessorConfig;
pub use error::SchedulerError;
pub use processor::{BackgroundProcessor, BackgroundProcessorBuilder, ProcessorState, RunSummary};
pub use singleton::{Reschedule, SingletonTask, TaskState};
pub use stats::{ProcessorStats, ProcessorStatsSnapshot};
