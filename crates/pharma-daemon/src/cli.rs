//! CLI argument parsing for the pharma daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// Default endpoint of a running daemon
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8000";

/// Pharmacy inventory daemon
///
/// Ingests branch inventory CSV uploads and keeps the product search index
/// in sync with storage.
#[derive(Parser, Debug)]
#[command(name = "pharma-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/pharma-sync/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the daemon: HTTP API, ingestion worker, change dispatcher, scheduler
    Start {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,

        /// Override HTTP port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Stop the running daemon
    Stop,

    /// Show daemon status, or the status of one ingestion task
    Status {
        /// Task id returned by an upload
        task_id: Option<String>,

        /// HTTP endpoint of the running daemon
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
    },

    /// Ingest an inventory CSV for one branch
    Ingest {
        /// CSV file to ingest
        file: String,

        /// Branch slug, e.g. "novamedika"
        #[arg(short, long)]
        branch: String,

        /// Branch number, e.g. "12"
        #[arg(short, long)]
        number: String,

        /// Upload to a running daemon instead of ingesting into the local database
        #[arg(short, long)]
        endpoint: Option<String>,

        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Re-index products from storage (daemon must be stopped)
    Resync {
        /// Database path (default from config)
        #[arg(long)]
        db_path: Option<String>,

        #[command(subcommand)]
        command: ResyncCommands,
    },

    /// Search the product index
    Search {
        /// Product name, possibly misspelled
        query: String,

        /// Only branches in this city
        #[arg(long)]
        city: Option<String>,

        /// Maximum results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Disable typo tolerance
        #[arg(long)]
        exact: bool,

        /// Treat the query as a serial number
        #[arg(long)]
        serial: bool,
    },
}

/// Resync subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum ResyncCommands {
    /// Re-index every record and sweep orphaned documents
    Full,

    /// Re-index records modified within the configured window
    Incremental,

    /// Re-index all records of one branch
    Branch {
        /// Canonical branch name, e.g. "Новамедика"
        name: String,

        /// Branch number
        number: String,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_start_foreground() {
        let cli = Cli::parse_from(["pharma-daemon", "start", "--foreground"]);
        match cli.command {
            Commands::Start { foreground, .. } => assert!(foreground),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_start_with_port() {
        let cli = Cli::parse_from(["pharma-daemon", "start", "-p", "9999"]);
        match cli.command {
            Commands::Start { port, .. } => assert_eq!(port, Some(9999)),
            _ => panic!("Expected Start command"),
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["pharma-daemon", "--config", "/path/to/config.toml", "stop"]);
        assert_eq!(cli.config, Some("/path/to/config.toml".to_string()));
        assert!(matches!(cli.command, Commands::Stop));
    }

    #[test]
    fn test_cli_status_without_task() {
        let cli = Cli::parse_from(["pharma-daemon", "status"]);
        match cli.command {
            Commands::Status { task_id, endpoint } => {
                assert_eq!(task_id, None);
                assert_eq!(endpoint, DEFAULT_ENDPOINT);
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_status_with_task() {
        let cli = Cli::parse_from([
            "pharma-daemon",
            "status",
            "01J0000000000000000000000",
            "-e",
            "http://localhost:9000",
        ]);
        match cli.command {
            Commands::Status { task_id, endpoint } => {
                assert_eq!(task_id.as_deref(), Some("01J0000000000000000000000"));
                assert_eq!(endpoint, "http://localhost:9000");
            }
            _ => panic!("Expected Status command"),
        }
    }

    #[test]
    fn test_cli_ingest() {
        let cli = Cli::parse_from([
            "pharma-daemon",
            "ingest",
            "stock.csv",
            "--branch",
            "novamedika",
            "--number",
            "12",
        ]);
        match cli.command {
            Commands::Ingest {
                file,
                branch,
                number,
                endpoint,
                ..
            } => {
                assert_eq!(file, "stock.csv");
                assert_eq!(branch, "novamedika");
                assert_eq!(number, "12");
                assert_eq!(endpoint, None);
            }
            _ => panic!("Expected Ingest command"),
        }
    }

    #[test]
    fn test_cli_ingest_requires_branch() {
        let result = Cli::try_parse_from(["pharma-daemon", "ingest", "stock.csv", "-n", "12"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_resync_variants() {
        let cli = Cli::parse_from(["pharma-daemon", "resync", "full"]);
        match cli.command {
            Commands::Resync { command, .. } => assert_eq!(command, ResyncCommands::Full),
            _ => panic!("Expected Resync command"),
        }

        let cli = Cli::parse_from(["pharma-daemon", "resync", "branch", "Новамедика", "12"]);
        match cli.command {
            Commands::Resync { command, .. } => assert_eq!(
                command,
                ResyncCommands::Branch {
                    name: "Новамедика".to_string(),
                    number: "12".to_string(),
                }
            ),
            _ => panic!("Expected Resync command"),
        }
    }

    #[test]
    fn test_cli_search() {
        let cli = Cli::parse_from([
            "pharma-daemon",
            "search",
            "аспирин",
            "--city",
            "Минск",
            "-n",
            "5",
        ]);
        match cli.command {
            Commands::Search {
                query,
                city,
                limit,
                exact,
                serial,
            } => {
                assert_eq!(query, "аспирин");
                assert_eq!(city.as_deref(), Some("Минск"));
                assert_eq!(limit, 5);
                assert!(!exact);
                assert!(!serial);
            }
            _ => panic!("Expected Search command"),
        }
    }

    #[test]
    fn test_cli_with_log_level() {
        let cli = Cli::parse_from(["pharma-daemon", "--log-level", "debug", "start"]);
        assert_eq!(cli.log_level, Some("debug".to_string()));
    }
}
