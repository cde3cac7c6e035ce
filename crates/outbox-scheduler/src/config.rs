//! Processor configuration.
//!
//! [`ProcessorConfig`] is the runtime form of
//! [`outbox_types::ProcessorSettings`], with durations instead of raw
//! millisecond counts.

use std::time::Duration;

use outbox_types::ProcessorSettings;

use crate::SchedulerError;

/// Configuration for a background processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Name of the logical queue, used in logs and spans
    pub queue_name: String,

    /// Delay before the next poll after an empty batch
    pub polling_interval: Duration,

    /// Maximum events read per run
    pub batch_size: usize,

    /// Failed attempts allowed per entity before giving up
    pub max_retries: u32,

    /// Delay before a retry successor becomes eligible
    pub retry_delay: Duration,

    /// Upper bound on waiting for the in-flight run during shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::convert(&ProcessorSettings::default())
    }
}

impl ProcessorConfig {
    /// Build from validated settings.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Config` if the settings are invalid.
    pub fn from_settings(settings: &ProcessorSettings) -> Result<Self, SchedulerError> {
        settings
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        Ok(Self::convert(settings))
    }

    fn convert(settings: &ProcessorSettings) -> Self {
        Self {
            queue_name: "outbox".to_string(),
            polling_interval: Duration::from_millis(settings.polling_interval_ms),
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            shutdown_timeout: Duration::from_secs(settings.shutdown_timeout_secs),
        }
    }

    /// Set the queue name.
    pub fn with_queue_name(mut self, name: impl Into<String>) -> Self {
        self.queue_name = name.into();
        self
    }

    /// Set the idle polling interval.
    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.batch_size == 0 {
            return Err(SchedulerError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_retries == 0 {
            return Err(SchedulerError::Config("max_retries must be > 0".to_string()));
        }
        if self.polling_interval.is_zero() {
            return Err(SchedulerError::Config(
                "polling_interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
