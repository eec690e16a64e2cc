use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use pharma_types::{IngestionTask, TaskResult};

use crate::{error::ApiError, state::ApiState};

const DEFAULT_TASK_LIST_LIMIT: usize = 20;
const MAX_TASK_LIST_LIMIT: usize = 500;

/// Externally visible view of an ingestion task.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: &'static str,
    pub result: Option<TaskResult>,
    pub attempts: u32,
    /// Error of the latest failed attempt, also set while a retry is pending
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<IngestionTask> for TaskStatusResponse {
    fn from(task: IngestionTask) -> Self {
        Self {
            status: task.status.as_str(),
            task_id: task.task_id,
            result: task.result,
            attempts: task.attempts,
            last_error: task.last_error,
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
        }
    }
}

pub async fn task_status(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let storage = state.storage().clone();
    let task = tokio::task::spawn_blocking(move || storage.get_task(&task_id)).await??;

    match task {
        Some(task) => Ok(Json(task.into())),
        None => Err(ApiError::NotFound("Task not found".to_string())),
    }
}

#[derive(Debug, Deserialize)]
pub struct TaskListParams {
    pub limit: Option<usize>,
}

/// Most recent tasks first.
pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(params): Query<TaskListParams>,
) -> Result<Json<Vec<TaskStatusResponse>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_TASK_LIST_LIMIT)
        .clamp(1, MAX_TASK_LIST_LIMIT);
    let storage = state.storage().clone();
    let tasks = tokio::task::spawn_blocking(move || storage.list_tasks(limit)).await??;

    Ok(Json(tasks.into_iter().map(Into::into).collect()))
}
