//! Column family definitions for RocksDB.
//!
//! - entities: system-of-record rows written by application transactions
//! - outbox: pending indexing events (point inserts and deletes)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for entity rows
pub const CF_ENTITIES: &str = "entities";

/// Column family name for the outbox table
pub const CF_OUTBOX: &str = "outbox";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_ENTITIES, CF_OUTBOX];

/// Create column family options for entities (compressed)
fn entities_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Create column family options for the outbox.
///
/// Rows are short-lived; every row is eventually deleted by a processor
/// run. FIFO compaction would drop unprocessed rows, so level compaction
/// is kept.
fn outbox_options() -> Options {
    let mut opts = Options::default();
    opts.set_level_compaction_dynamic_level_bytes(true);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ENTITIES, entities_options()),
        ColumnFamilyDescriptor::new(CF_OUTBOX, outbox_options()),
    ]
}
