//! Configuration loading for the search outbox.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/search-outbox/config.toml.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::OutboxError;

/// Tunables for the background processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSettings {
    /// Delay between polls while the queue is empty (ms).
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,

    /// Maximum events read per run.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Failed attempts allowed per entity before the failure handler is invoked.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before a retry successor becomes eligible (ms). 0 = immediately.
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Upper bound on waiting for an in-flight run during shutdown (seconds).
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_polling_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            retry_delay_ms: 0,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl ProcessorSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.batch_size == 0 {
            return Err(OutboxError::Config("batch_size must be > 0".to_string()));
        }
        if self.max_retries == 0 {
            return Err(OutboxError::Config("max_retries must be > 0".to_string()));
        }
        if self.polling_interval_ms == 0 {
            return Err(OutboxError::Config(
                "polling_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Horizontal partitioning of one logical queue across several workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingSettings {
    /// Total number of shards the queue is split into
    pub total_shards: u32,

    /// Shards this worker processes
    pub assigned_shards: Vec<u32>,
}

impl ShardingSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), OutboxError> {
        if self.total_shards == 0 {
            return Err(OutboxError::Config("total_shards must be > 0".to_string()));
        }
        if self.assigned_shards.is_empty() {
            return Err(OutboxError::Config(
                "assigned_shards must not be empty".to_string(),
            ));
        }
        if let Some(shard) = self
            .assigned_shards
            .iter()
            .find(|shard| **shard >= self.total_shards)
        {
            return Err(OutboxError::Config(format!(
                "assigned shard {} out of range (total_shards = {})",
                shard, self.total_shards
            )));
        }
        Ok(())
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Background processor tunables
    #[serde(default)]
    pub processor: ProcessorSettings,

    /// Optional shard assignment for this worker
    #[serde(default)]
    pub sharding: Option<ShardingSettings>,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "search-outbox")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            processor: ProcessorSettings::default(),
            sharding: None,
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/search-outbox/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (OUTBOX_*, `__` for nesting)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, OutboxError> {
        let config_dir = ProjectDirs::from("", "", "search-outbox")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");
        let processor = ProcessorSettings::default();

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default(
                "processor.polling_interval_ms",
                processor.polling_interval_ms as i64,
            )
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default("processor.batch_size", processor.batch_size as i64)
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default("processor.max_retries", processor.max_retries as i64)
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default("processor.retry_delay_ms", processor.retry_delay_ms as i64)
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .set_default(
                "processor.shutdown_timeout_secs",
                processor.shutdown_timeout_secs as i64,
            )
            .map_err(|e| OutboxError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // OUTBOX_DB_PATH, OUTBOX_PROCESSOR__BATCH_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("OUTBOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| OutboxError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| OutboxError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate all nested settings.
    pub fn validate(&self) -> Result<(), OutboxError> {
        self.processor.validate()?;
        if let Some(sharding) = &self.sharding {
            sharding.validate()?;
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(dirs) = directories::BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
