//! Command implementations for the outbox admin tool.
//!
//! Handles:
//! - stats: pending counts by entity type and operation
//! - list: pending events, oldest first
//! - purge: administrative delete of pending events
//! - config: effective settings as TOML

use std::collections::BTreeMap;
use std::fs;

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use serde::Serialize;
use tracing::{debug, info};

use outbox_storage::Storage;
use outbox_types::{EventRecord, OutboxOperation, Settings};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Initialize logging from `RUST_LOG`, falling back to the configured level.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the configured database, creating parent directories if needed.
pub fn open_storage(settings: &Settings) -> Result<Storage> {
    let db_path = settings.expanded_db_path();
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    debug!("Opening storage at {:?}", db_path);
    Storage::open(&db_path).context("Failed to open storage")
}

/// Pending counts for one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub add: u64,
    pub add_or_update: u64,
    pub delete: u64,
}

impl TypeStats {
    fn record(&mut self, operation: OutboxOperation) {
        match operation {
            OutboxOperation::Add => self.add += 1,
            OutboxOperation::AddOrUpdate => self.add_or_update += 1,
            OutboxOperation::Delete => self.delete += 1,
        }
    }

    /// Total pending events of this type.
    pub fn total(&self) -> u64 {
        self.add + self.add_or_update + self.delete
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Pending events
    pub pending: u64,
    /// Pending events that already failed at least once
    pub retrying: u64,
    /// Pending events not yet due because of a retry delay
    pub delayed: u64,
    /// Entity rows in the system of record
    pub entities: u64,
    /// Pending events per entity type
    pub by_type: BTreeMap<String, TypeStats>,
}

/// Gather queue statistics.
pub fn collect_stats(storage: &Storage) -> Result<QueueStats> {
    let storage_stats = storage.get_stats().context("Failed to read storage stats")?;
    let now_ms = Utc::now().timestamp_millis();

    let mut stats = QueueStats {
        entities: storage_stats.entity_count,
        ..Default::default()
    };
    storage
        .scan_events(|record| {
            stats.pending += 1;
            if record.event.retry_count > 0 {
                stats.retrying += 1;
            }
            if !record.event.is_due(now_ms) {
                stats.delayed += 1;
            }
            stats
                .by_type
                .entry(record.event.entity_type)
                .or_default()
                .record(record.event.operation);
            true
        })
        .context("Failed to scan outbox")?;
    Ok(stats)
}

/// Show queue statistics.
pub fn handle_stats(storage: &Storage) -> Result<()> {
    let stats = collect_stats(storage)?;

    println!("Outbox Statistics");
    println!("=================");
    println!("Pending events:  {}", stats.pending);
    println!("  retrying:      {}", stats.retrying);
    println!("  delayed:       {}", stats.delayed);
    println!("Entities:        {}", stats.entities);

    if !stats.by_type.is_empty() {
        println!();
        println!(
            "{:<24} {:>8} {:>8} {:>14} {:>8}",
            "ENTITY TYPE", "TOTAL", "ADD", "ADD_OR_UPDATE", "DELETE"
        );
        for (entity_type, counts) in &stats.by_type {
            println!(
                "{:<24} {:>8} {:>8} {:>14} {:>8}",
                entity_type,
                counts.total(),
                counts.add,
                counts.add_or_update,
                counts.delete
            );
        }
    }
    Ok(())
}

/// Pending events, oldest first, optionally filtered by entity type.
pub fn list_events(
    storage: &Storage,
    limit: usize,
    entity_type: Option<&str>,
) -> Result<Vec<EventRecord>> {
    let mut events = Vec::new();
    if limit == 0 {
        return Ok(events);
    }
    storage
        .scan_events(|record| {
            if entity_type.map_or(true, |t| record.event.entity_type == t) {
                events.push(record);
            }
            events.len() < limit
        })
        .context("Failed to scan outbox")?;
    Ok(events)
}

/// Print pending events.
pub fn handle_list(storage: &Storage, limit: usize, entity_type: Option<&str>) -> Result<()> {
    let events = list_events(storage, limit, entity_type)?;
    if events.is_empty() {
        println!("No pending events");
        return Ok(());
    }

    println!(
        "{:>10}  {:<14} {:>5}  {:<24} {:<32}",
        "ID", "OPERATION", "RETRY", "CREATED", "ENTITY"
    );
    for record in &events {
        let created = Utc
            .timestamp_millis_opt(record.event.created_at_ms)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| record.event.created_at_ms.to_string());
        println!(
            "{:>10}  {:<14} {:>5}  {:<24} {:<32}",
            record.id,
            record.event.operation.to_string(),
            record.event.retry_count,
            created,
            record.entity_reference().to_string()
        );
    }
    Ok(())
}

/// Delete pending events, optionally only those of one entity type.
///
/// Refuses to run without explicit confirmation.
pub fn purge_events(storage: &Storage, entity_type: Option<&str>, confirmed: bool) -> Result<usize> {
    if !confirmed {
        bail!("Refusing to purge without --yes; purged events are never indexed");
    }
    let purged = storage
        .purge_events(|record| entity_type.map_or(true, |t| record.event.entity_type == t))
        .context("Failed to purge outbox")?;
    info!(purged, entity_type = ?entity_type, "Purged pending events");
    Ok(purged)
}

/// Purge pending events and report the count.
pub fn handle_purge(storage: &Storage, entity_type: Option<&str>, confirmed: bool) -> Result<()> {
    let purged = purge_events(storage, entity_type, confirmed)?;
    println!("Purged {} pending event(s)", purged);
    Ok(())
}

/// Render settings as TOML.
pub fn render_config(settings: &Settings) -> Result<String> {
    toml::to_string_pretty(settings).context("Failed to render configuration")
}

/// Print the effective configuration.
pub fn handle_config(settings: &Settings) -> Result<()> {
    print!("{}", render_config(settings)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use outbox_types::{DocumentRoutes, OutboxEvent};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (storage, temp_dir)
    }

    fn seed(storage: &Storage) {
        let mut txn = storage.begin();
        txn.put_entity("Book", "1", b"{}").unwrap();
        for (entity_type, id, op, retry) in [
            ("Book", "1", OutboxOperation::Add, 0),
            ("Book", "2", OutboxOperation::AddOrUpdate, 1),
            ("Author", "7", OutboxOperation::Delete, 0),
        ] {
            let event = OutboxEvent::new(entity_type, id, op, DocumentRoutes::unrouted())
                .with_retry_count(retry);
            txn.insert_event(&event).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn test_collect_stats() {
        let (storage, _temp) = create_test_storage();
        seed(&storage);

        let stats = collect_stats(&storage).unwrap();
        assert_eq!(stats.pending, 3);
        assert_eq!(stats.retrying, 1);
        assert_eq!(stats.delayed, 0);
        assert_eq!(stats.entities, 1);
        assert_eq!(
            stats.by_type["Book"],
            TypeStats {
                add: 1,
                add_or_update: 1,
                delete: 0
            }
        );
        assert_eq!(stats.by_type["Author"].total(), 1);
    }

    #[test]
    fn test_list_events_filters_and_limits() {
        let (storage, _temp) = create_test_storage();
        seed(&storage);

        let all = list_events(&storage, 10, None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));

        let books = list_events(&storage, 10, Some("Book")).unwrap();
        assert_eq!(books.len(), 2);

        let first = list_events(&storage, 1, None).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].event.entity_id, "1");
    }

    #[test]
    fn test_purge_requires_confirmation() {
        let (storage, _temp) = create_test_storage();
        seed(&storage);

        assert!(purge_events(&storage, None, false).is_err());
        assert_eq!(storage.count_events().unwrap(), 3);

        assert_eq!(purge_events(&storage, Some("Author"), true).unwrap(), 1);
        assert_eq!(purge_events(&storage, None, true).unwrap(), 2);
        assert_eq!(storage.count_events().unwrap(), 0);
    }

    #[test]
    fn test_render_config() {
        let settings = Settings {
            db_path: "/tmp/outbox".to_string(),
            ..Default::default()
        };
        let rendered = render_config(&settings).unwrap();
        assert!(rendered.contains("db_path = \"/tmp/outbox\""));
        assert!(rendered.contains("[processor]"));
        assert!(rendered.contains("batch_size = 50"));
    }

    #[test]
    fn test_open_storage_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings {
            db_path: temp_dir
                .path()
                .join("nested")
                .join("db")
                .to_string_lossy()
                .to_string(),
            ..Default::default()
        };
        let storage = open_storage(&settings).unwrap();
        assert_eq!(storage.count_events().unwrap(), 0);
    }
}
