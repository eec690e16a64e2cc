//! Command implementations for the pharma daemon.
//!
//! Handles:
//! - start: Load config, open storage and index, run worker, dispatcher,
//!   scheduler and HTTP server until a shutdown signal
//! - stop/status: PID file based daemon control
//! - ingest/resync/search: one-shot local operations

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pharma_indexing::{ChangeDispatcher, ChangeNotifier, IndexSynchronizer, SyncConfig, SyncStatus};
use pharma_ingest::{IngestionOrchestrator, IngestionWorker, RetryPolicy, WorkerConfig};
use pharma_scheduler::{register_sync_jobs, SchedulerConfig, SchedulerService, SyncJobsConfig};
use pharma_search::{
    ProductSearcher, SearchBackend, SearchIndex, SearchIndexConfig, SearchOptions, TantivyBackend,
};
use pharma_service::{run_server_with_shutdown, ApiState};
use pharma_storage::Storage;
use pharma_types::{Settings, TaskStatus};

use crate::cli::ResyncCommands;

const APP_DIR: &str = "pharma-sync";

/// Get the PID file path
fn pid_file_path() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| {
            #[cfg(unix)]
            {
                dirs.runtime_dir()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| dirs.cache_dir().to_path_buf())
            }
            #[cfg(not(unix))]
            {
                dirs.cache_dir().to_path_buf()
            }
        })
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("daemon.pid")
}

fn write_pid_file() -> Result<()> {
    let pid_path = pid_file_path();
    if let Some(parent) = pid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&pid_path, std::process::id().to_string())?;
    info!("Wrote PID file: {:?}", pid_path);
    Ok(())
}

fn remove_pid_file() {
    let pid_path = pid_file_path();
    if pid_path.exists() {
        if let Err(e) = fs::remove_file(&pid_path) {
            warn!("Failed to remove PID file: {}", e);
        } else {
            info!("Removed PID file");
        }
    }
}

fn read_pid_file() -> Option<u32> {
    fs::read_to_string(pid_file_path())
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    // Signal 0 only checks that the process exists
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    true
}

/// Load settings and apply the global CLI overrides.
fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(log_level) = log_level {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Arc<Storage>> {
    let db_path = settings.expanded_db_path();
    info!("Opening storage at {:?}", db_path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    let storage = Storage::open(&db_path).context("Failed to open storage")?;
    Ok(Arc::new(storage))
}

fn index_config(settings: &Settings) -> SearchIndexConfig {
    SearchIndexConfig::new(settings.expanded_search_index_path())
        .with_memory_mb(settings.sync.writer_memory_mb)
}

/// Storage, index and synchronizer shared by the daemon and local commands.
struct Pipeline {
    storage: Arc<Storage>,
    backend: Arc<dyn SearchBackend>,
    synchronizer: Arc<IndexSynchronizer>,
    dispatcher: Arc<ChangeDispatcher>,
    orchestrator: IngestionOrchestrator,
}

impl Pipeline {
    fn build(settings: &Settings) -> Result<Self> {
        let storage = open_storage(settings)?;
        let backend: Arc<dyn SearchBackend> = Arc::new(TantivyBackend::new(index_config(settings)));
        let synchronizer = Arc::new(IndexSynchronizer::new(
            storage.clone(),
            backend.clone(),
            SyncConfig::from_settings(&settings.sync),
        ));
        let notifier = ChangeNotifier::new();
        let dispatcher = Arc::new(ChangeDispatcher::new(
            storage.clone(),
            synchronizer.clone(),
            notifier.clone(),
        ));
        let orchestrator = IngestionOrchestrator::new(storage.clone(), settings.ingest.clone())
            .with_notifier(notifier);

        Ok(Self {
            storage,
            backend,
            synchronizer,
            dispatcher,
            orchestrator,
        })
    }

    fn worker(&self, settings: &Settings) -> IngestionWorker {
        IngestionWorker::new(
            self.orchestrator.clone(),
            RetryPolicy::from_settings(&settings.ingest),
            WorkerConfig::from_settings(&settings.ingest),
        )
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Start the daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open RocksDB storage and the product index
/// 3. Start the ingestion worker, change dispatcher and scheduler
/// 4. Serve HTTP until SIGINT/SIGTERM, then stop everything in reverse
pub async fn start_daemon(
    config_path: Option<&str>,
    foreground: bool,
    port_override: Option<u16>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level_override)?;
    if let Some(port) = port_override {
        settings.http_port = port;
    }
    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }

    init_logging(&settings.log_level)?;

    info!("Pharma daemon starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Search index path: {}", settings.search_index_path);
    info!("  HTTP address: {}", settings.http_addr());
    info!("  Branches: {:?}", settings.ingest.branches.keys().collect::<Vec<_>>());

    if !foreground {
        warn!("Background mode not implemented, running in foreground");
        warn!("Use a process manager (systemd, launchd) for background operation");
    }

    let addr: SocketAddr = settings
        .http_addr()
        .parse()
        .context("Invalid HTTP address")?;

    let pipeline = Pipeline::build(&settings)?;
    match pipeline.backend.ensure_index().await {
        Ok(created) => info!(created, "Product index ready"),
        Err(e) => warn!(error = %e, "Product index unavailable, indexing will be skipped"),
    }

    let cancel = CancellationToken::new();
    let worker = Arc::new(pipeline.worker(&settings));
    let worker_handle = tokio::spawn(worker.run(cancel.clone()));

    // Events left in the outbox by a previous run
    pipeline.dispatcher.notifier().notify();
    let dispatcher_handle = tokio::spawn(pipeline.dispatcher.clone().run(cancel.clone()));

    let mut scheduler = SchedulerService::new(SchedulerConfig::from_settings(&settings.sync))
        .await
        .context("Failed to create scheduler")?;
    register_sync_jobs(
        &scheduler,
        pipeline.synchronizer.clone(),
        pipeline.dispatcher.clone(),
        &SyncJobsConfig::from_settings(&settings.sync),
    )
    .await
    .context("Failed to register sync jobs")?;
    scheduler.start().await.context("Failed to start scheduler")?;

    write_pid_file()?;

    let state = ApiState::new(pipeline.orchestrator.clone(), pipeline.backend.clone())
        .with_jobs(scheduler.registry());
    let result = run_server_with_shutdown(addr, state, shutdown_signal()).await;

    info!("HTTP server stopped, stopping background tasks...");
    cancel.cancel();
    if let Err(e) = worker_handle.await {
        warn!(error = %e, "Ingestion worker ended abnormally");
    }
    if let Err(e) = dispatcher_handle.await {
        warn!(error = %e, "Change dispatcher ended abnormally");
    }
    if let Err(e) = scheduler.shutdown().await {
        warn!(error = %e, "Scheduler shutdown failed");
    }
    if let Err(e) = pipeline.storage.flush() {
        warn!(error = %e, "Failed to flush storage");
    }

    remove_pid_file();
    info!("Shutdown complete");

    result.context("HTTP server error")
}

/// Stop the running daemon by sending SIGTERM.
pub fn stop_daemon() -> Result<()> {
    let pid = read_pid_file().context("No PID file found - daemon may not be running")?;

    if !is_process_running(pid) {
        remove_pid_file();
        anyhow::bail!("Daemon not running (stale PID file removed)");
    }

    #[cfg(unix)]
    {
        unsafe {
            if libc::kill(pid as i32, libc::SIGTERM) != 0 {
                anyhow::bail!("Failed to send SIGTERM to daemon");
            }
        }
        println!("Sent SIGTERM to daemon (PID {})", pid);
    }

    #[cfg(not(unix))]
    {
        anyhow::bail!("Stop command not implemented on this platform");
    }

    Ok(())
}

/// Show daemon status.
pub fn show_status() -> Result<()> {
    let pid_path = pid_file_path();

    match read_pid_file() {
        Some(pid) if is_process_running(pid) => {
            println!("Pharma daemon is running (PID {})", pid);
            println!("PID file: {:?}", pid_path);
        }
        Some(pid) => {
            println!(
                "Pharma daemon is NOT running (stale PID {} in {:?})",
                pid, pid_path
            );
        }
        None => {
            println!("Pharma daemon is NOT running (no PID file)");
        }
    }
    Ok(())
}

fn api_url(endpoint: &str, path: &str) -> String {
    format!("{}{}", endpoint.trim_end_matches('/'), path)
}

/// Fetch one task's status from a running daemon.
pub async fn show_task_status(endpoint: &str, task_id: &str) -> Result<()> {
    let url = api_url(endpoint, &format!("/api/status/{}", task_id));
    let response = reqwest::get(&url)
        .await
        .with_context(|| format!("Failed to reach daemon at {}", endpoint))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("Invalid response from daemon")?;
    if !status.is_success() {
        anyhow::bail!("{} ({})", body["error"].as_str().unwrap_or("request failed"), status);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Ingest a CSV file, either through a running daemon or directly into
/// the local database.
pub async fn handle_ingest(
    config_path: Option<&str>,
    log_level: Option<&str>,
    file: &str,
    branch: &str,
    number: &str,
    endpoint: Option<&str>,
    db_path: Option<&str>,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    init_logging(&settings.log_level)?;

    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;
    let filename = Path::new(file)
        .file_name()
        .map(|name| name.to_string_lossy().to_string());

    match endpoint {
        Some(endpoint) => upload_remote(endpoint, branch, number, filename, bytes).await,
        None => ingest_local(&settings, branch, number, filename.as_deref(), &bytes).await,
    }
}

async fn upload_remote(
    endpoint: &str,
    branch: &str,
    number: &str,
    filename: Option<String>,
    bytes: Vec<u8>,
) -> Result<()> {
    let mut part = reqwest::multipart::Part::bytes(bytes);
    if let Some(filename) = filename {
        part = part.file_name(filename);
    }
    let form = reqwest::multipart::Form::new().part("file", part);

    let url = api_url(endpoint, &format!("/api/upload/{}/{}", branch, number));
    let response = reqwest::Client::new()
        .post(&url)
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("Failed to reach daemon at {}", endpoint))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("Invalid response from daemon")?;
    if !status.is_success() {
        anyhow::bail!("Upload rejected: {} ({})", body["error"].as_str().unwrap_or("unknown error"), status);
    }

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn ingest_local(
    settings: &Settings,
    branch: &str,
    number: &str,
    filename: Option<&str>,
    bytes: &[u8],
) -> Result<()> {
    let pipeline = Pipeline::build(settings)?;
    let worker = pipeline.worker(settings);

    let task_id = pipeline
        .orchestrator
        .submit_upload(branch, number, filename, bytes)
        .await?;
    info!(task_id = %task_id, "Task created");

    worker.run_once().await.context("Ingestion failed")?;
    let task = pipeline
        .storage
        .get_task(&task_id)?
        .context("Task disappeared after ingestion")?;

    let dispatch = pipeline
        .dispatcher
        .dispatch_pending()
        .await
        .context("Index update failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "task_id": task.task_id,
            "status": task.status.as_str(),
            "result": task.result,
            "index": dispatch.outcome,
        }))?
    );

    match task.status {
        TaskStatus::Completed => Ok(()),
        TaskStatus::Failed => anyhow::bail!("Ingestion failed"),
        _ => {
            println!("Attempt failed, a retry is queued for the next daemon start");
            Ok(())
        }
    }
}

/// Run one synchronizer operation against the local database and index.
pub async fn handle_resync(
    config_path: Option<&str>,
    log_level: Option<&str>,
    db_path: Option<&str>,
    command: ResyncCommands,
) -> Result<()> {
    let mut settings = load_settings(config_path, log_level)?;
    if let Some(db_path) = db_path {
        settings.db_path = db_path.to_string();
    }
    init_logging(&settings.log_level)?;

    let pipeline = Pipeline::build(&settings)?;
    let outcome = match command {
        ResyncCommands::Full => pipeline.synchronizer.full_resync().await,
        ResyncCommands::Incremental => pipeline.synchronizer.incremental_update().await,
        ResyncCommands::Branch { name, number } => {
            pipeline.synchronizer.update_for_branch(&name, &number).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.status == SyncStatus::Failed {
        anyhow::bail!("Resync failed");
    }
    Ok(())
}

/// Query the product index without taking the writer lock, so it works
/// while the daemon runs.
pub fn handle_search(
    config_path: Option<&str>,
    log_level: Option<&str>,
    query: &str,
    city: Option<String>,
    limit: usize,
    exact: bool,
    serial: bool,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_logging(&settings.log_level)?;

    let index = SearchIndex::open_existing(index_config(&settings))
        .context("Failed to open product index; has the daemon indexed anything yet?")?;
    let reader = index.reader().context("Failed to open index reader")?;
    let searcher = ProductSearcher::new(&index, reader);

    if serial {
        let products = searcher.find_by_serial(query)?;
        println!("{}", serde_json::to_string_pretty(&products)?);
        return Ok(());
    }

    let mut options = SearchOptions::default().with_limit(limit);
    if let Some(city) = city {
        options = options.in_city(city);
    }
    if exact {
        options = options.exact();
    }

    let hits = searcher.search(query, &options)?;
    if hits.is_empty() {
        println!("No products found");
        return Ok(());
    }
    for hit in hits {
        let product = hit.product;
        println!(
            "{:>6.2}  {} {} | {} #{} {} | price {} | qty {} | exp {}",
            hit.score,
            product.name,
            product.form,
            product.branch_name,
            product.branch_number,
            product.city,
            product.price,
            product.quantity,
            product.expiry_date,
        );
    }
    Ok(())
}
