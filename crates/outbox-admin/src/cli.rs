//! CLI argument parsing for the outbox admin tool.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Search Outbox Admin
///
/// Inspect and maintain the pending indexing events of a search outbox.
#[derive(Parser, Debug)]
#[command(name = "outbox-admin")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/search-outbox/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Admin commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show queue statistics
    Stats,

    /// List pending events, oldest first
    List {
        /// Maximum events to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Only show events for this entity type
        #[arg(short, long)]
        entity_type: Option<String>,
    },

    /// Delete pending events without indexing them
    Purge {
        /// Only purge events for this entity type
        #[arg(short, long)]
        entity_type: Option<String>,

        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Print the effective configuration
    Config,
}
