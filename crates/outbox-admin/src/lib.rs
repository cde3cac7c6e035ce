//! Outbox admin library exports.
//!
//! This crate provides the operator CLI for the search outbox.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (stats, list, purge, config)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    collect_stats, handle_config, handle_list, handle_purge, handle_stats, init_logging,
    list_events, load_settings, open_storage, purge_events, render_config, QueueStats, TypeStats,
};
