//! Pharma Daemon
//!
//! Ingests pharmacy branch inventory CSV uploads and keeps the product
//! search index in sync with storage.
//!
//! # Usage
//!
//! ```bash
//! pharma-daemon start [--foreground] [--port PORT] [--db-path PATH]
//! pharma-daemon stop
//! pharma-daemon status [TASK_ID]
//! pharma-daemon ingest stock.csv --branch novamedika --number 12
//! pharma-daemon resync full|incremental|branch NAME NUMBER
//! pharma-daemon search "аспирин" --city Минск
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/pharma-sync/config.toml)
//! 3. Environment variables (PHARMA_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use pharma_daemon::{
    handle_ingest, handle_resync, handle_search, show_status, show_task_status, start_daemon,
    stop_daemon, Cli, Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config.as_deref();
    let log_level = cli.log_level.as_deref();

    match cli.command {
        Commands::Start {
            foreground,
            port,
            db_path,
        } => {
            start_daemon(config, foreground, port, db_path.as_deref(), log_level).await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status { task_id, endpoint } => match task_id {
            Some(task_id) => show_task_status(&endpoint, &task_id).await?,
            None => show_status()?,
        },
        Commands::Ingest {
            file,
            branch,
            number,
            endpoint,
            db_path,
        } => {
            handle_ingest(
                config,
                log_level,
                &file,
                &branch,
                &number,
                endpoint.as_deref(),
                db_path.as_deref(),
            )
            .await?;
        }
        Commands::Resync { db_path, command } => {
            handle_resync(config, log_level, db_path.as_deref(), command).await?;
        }
        Commands::Search {
            query,
            city,
            limit,
            exact,
            serial,
        } => {
            handle_search(config, log_level, &query, city, limit, exact, serial)?;
        }
    }

    Ok(())
}
