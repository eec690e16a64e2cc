use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::{error::ApiError, state::ApiState};

/// Liveness plus search backend reachability. Always 200: the upload path
/// works without the index.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let search_backend = state.backend.ping().await;
    if !search_backend {
        tracing::warn!("Search backend unreachable");
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "search_backend": search_backend
        })),
    )
}

/// Status of the scheduled sync jobs.
pub async fn scheduler_jobs(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let registry = state
        .jobs
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("Scheduler not running".to_string()))?;
    Ok(Json(registry.get_all_status()))
}
