//! Configuration loading for the pharmacy sync daemon.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/pharma-sync/config.toml.

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::PharmaError;

const APP_NAME: &str = "pharma-sync";

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestSettings {
    /// Records buffered before being staged into the storage write
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Row errors kept verbatim in the task result
    #[serde(default = "default_error_sample_limit")]
    pub error_sample_limit: usize,

    /// Retries after the first failed attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay before a retried attempt
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Jobs processed in parallel by the worker
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Queue poll interval when idle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upload slug -> canonical branch display name
    #[serde(default = "default_branches")]
    pub branches: BTreeMap<String, String>,
}

fn default_batch_size() -> usize {
    5_000
}

fn default_error_sample_limit() -> usize {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    60
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_branches() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("novamedika".to_string(), "Новамедика".to_string()),
        ("ekliniya".to_string(), "Эклиния".to_string()),
    ])
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            error_sample_limit: default_error_sample_limit(),
            max_retries: default_max_retries(),
            retry_backoff_secs: default_retry_backoff_secs(),
            worker_concurrency: default_worker_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            branches: default_branches(),
        }
    }
}

impl IngestSettings {
    /// Canonical branch name for an upload slug. Lookup is case-insensitive.
    pub fn resolve_branch(&self, slug: &str) -> Option<&str> {
        self.branches
            .get(&slug.to_lowercase())
            .map(String::as_str)
    }

    /// Total attempts allowed for one task.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Search index synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Documents per bulk request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Trailing window for incremental updates
    #[serde(default = "default_incremental_window_secs")]
    pub incremental_window_secs: u64,

    #[serde(default = "default_incremental_cron")]
    pub incremental_cron: String,

    #[serde(default = "default_full_resync_cron")]
    pub full_resync_cron: String,

    #[serde(default = "default_dispatch_cron")]
    pub dispatch_cron: String,

    /// IANA timezone for the cron schedules
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Memory budget of the index writer
    #[serde(default = "default_writer_memory_mb")]
    pub writer_memory_mb: usize,
}

fn default_chunk_size() -> usize {
    3_000
}

fn default_incremental_window_secs() -> u64 {
    120
}

fn default_incremental_cron() -> String {
    "0 */2 * * * *".to_string()
}

fn default_full_resync_cron() -> String {
    "0 0 3 * * *".to_string()
}

fn default_dispatch_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_writer_memory_mb() -> usize {
    50
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            incremental_window_secs: default_incremental_window_secs(),
            incremental_cron: default_incremental_cron(),
            full_resync_cron: default_full_resync_cron(),
            dispatch_cron: default_dispatch_cron(),
            timezone: default_timezone(),
            writer_memory_mb: default_writer_memory_mb(),
        }
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Path to the product search index directory
    #[serde(default = "default_search_index_path")]
    pub search_index_path: String,

    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub ingest: IngestSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

fn data_dir_path(leaf: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(leaf))
        .unwrap_or_else(|| PathBuf::from(format!("./{}", leaf)))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir_path("db")
}

fn default_search_index_path() -> String {
    data_dir_path("products-index")
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            search_index_path: default_search_index_path(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            log_level: default_log_level(),
            ingest: IngestSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/pharma-sync/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (PHARMA_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, PharmaError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| PharmaError::Config(e.to_string()))?
            .set_default("search_index_path", default_search_index_path())
            .map_err(|e| PharmaError::Config(e.to_string()))?
            .set_default("http_host", default_http_host())
            .map_err(|e| PharmaError::Config(e.to_string()))?
            .set_default("http_port", default_http_port() as i64)
            .map_err(|e| PharmaError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| PharmaError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // PHARMA_DB_PATH, PHARMA_HTTP_PORT, PHARMA_INGEST__BATCH_SIZE, ...
        builder = builder.add_source(
            Environment::with_prefix("PHARMA")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| PharmaError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| PharmaError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PharmaError> {
        if self.ingest.batch_size == 0 {
            return Err(PharmaError::Config("ingest.batch_size must be > 0".into()));
        }
        if self.sync.chunk_size == 0 {
            return Err(PharmaError::Config("sync.chunk_size must be > 0".into()));
        }
        if self.ingest.worker_concurrency == 0 {
            return Err(PharmaError::Config(
                "ingest.worker_concurrency must be > 0".into(),
            ));
        }
        if self.ingest.branches.is_empty() {
            return Err(PharmaError::Config("ingest.branches must not be empty".into()));
        }
        Ok(())
    }

    /// Socket address string for the HTTP server
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    /// Expand ~ in search_index_path to the home directory
    pub fn expanded_search_index_path(&self) -> PathBuf {
        expand_home(&self.search_index_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(dirs) = directories::BaseDirs::new() {
            return dirs.home_dir().join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.http_port, 8000);
        assert_eq!(settings.ingest.batch_size, 5_000);
        assert_eq!(settings.ingest.max_attempts(), 4);
        assert_eq!(settings.sync.chunk_size, 3_000);
        assert_eq!(settings.sync.incremental_window_secs, 120);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.http_port, 8000);
        assert_eq!(settings.sync.timezone, "UTC");
    }

    #[test]
    fn test_load_from_file_overrides_nested_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pharma.toml");
        std::fs::write(
            &path,
            "http_port = 9100\n[ingest]\nbatch_size = 10\n[ingest.branches]\nnovamedika = \"Новамедика\"\n",
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.http_port, 9100);
        assert_eq!(settings.ingest.batch_size, 10);
        assert_eq!(settings.ingest.error_sample_limit, 10);
        assert_eq!(settings.ingest.branches.len(), 1);
    }

    #[test]
    fn test_resolve_branch_is_case_insensitive() {
        let ingest = IngestSettings::default();
        assert_eq!(ingest.resolve_branch("NovaMedika"), Some("Новамедика"));
        assert_eq!(ingest.resolve_branch("ekliniya"), Some("Эклиния"));
        assert_eq!(ingest.resolve_branch("unknown"), None);
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut settings = Settings::default();
        settings.ingest.batch_size = 0;
        assert!(matches!(settings.validate(), Err(PharmaError::Config(_))));
    }

    #[test]
    fn test_http_addr() {
        let settings = Settings::default();
        assert_eq!(settings.http_addr(), "0.0.0.0:8000");
    }
}
