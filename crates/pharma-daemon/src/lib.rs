//! Pharma daemon library exports.
//!
//! This crate provides the CLI daemon binary for the pharmacy inventory
//! pipeline.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, ingest, resync, search)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, ResyncCommands, DEFAULT_ENDPOINT};
pub use commands::{
    handle_ingest, handle_resync, handle_search, show_status, show_task_status, start_daemon,
    stop_daemon,
};
