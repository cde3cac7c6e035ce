//! Search Outbox Admin
//!
//! Operator tool for the pending indexing events of a search outbox.
//!
//! # Usage
//!
//! ```bash
//! outbox-admin stats
//! outbox-admin list [--limit N] [--entity-type TYPE]
//! outbox-admin purge [--entity-type TYPE] --yes
//! outbox-admin config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/search-outbox/config.toml)
//! 3. Environment variables (OUTBOX_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use outbox_admin::{
    handle_config, handle_list, handle_purge, handle_stats, init_logging, load_settings,
    open_storage, Cli, Commands,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;

    match cli.command {
        Commands::Stats => {
            let storage = open_storage(&settings)?;
            handle_stats(&storage)?;
        }
        Commands::List { limit, entity_type } => {
            let storage = open_storage(&settings)?;
            handle_list(&storage, limit, entity_type.as_deref())?;
        }
        Commands::Purge { entity_type, yes } => {
            let storage = open_storage(&settings)?;
            handle_purge(&storage, entity_type.as_deref(), yes)?;
        }
        Commands::Config => {
            handle_config(&settings)?;
        }
    }

    Ok(())
}
