//! HTTP surface of the pharmacy inventory pipeline.
//!
//! Provides:
//! - `POST /api/upload/{branch_slug}/{branch_number}`: accept a CSV, queue an ingestion task
//! - `GET /api/status/{task_id}`: task status and result
//! - `GET /api/tasks`: most recent tasks
//! - `GET /api/scheduler/jobs`: scheduled sync job status
//! - `GET /health`: liveness and search backend reachability

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

pub mod error;
mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::status::TaskStatusResponse;
pub use routes::upload::UploadAccepted;
pub use state::{ApiState, DEFAULT_UPLOAD_LIMIT_BYTES};

use routes::{
    health::{health, scheduler_jobs},
    status::{list_tasks, task_status},
    upload::upload_inventory,
};

/// Build the application router.
pub fn router(state: ApiState) -> Router {
    let upload_limit = state.upload_limit_bytes;

    Router::new()
        .route("/health", get(health))
        .route(
            "/api/upload/{branch_slug}/{branch_number}",
            post(upload_inventory).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/status/{task_id}", get(task_status))
        .route("/api/tasks", get(list_tasks))
        .route("/api/scheduler/jobs", get(scheduler_jobs))
        .with_state(state)
}

/// Serve on `addr` until `shutdown_signal` resolves.
pub async fn run_server_with_shutdown<F>(
    addr: SocketAddr,
    state: ApiState,
    shutdown_signal: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server ready");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("HTTP server shutdown complete");
    Ok(())
}
