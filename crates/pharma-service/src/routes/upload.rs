use axum::{
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::info;

use crate::{error::ApiError, state::ApiState};

/// Multipart field carrying the CSV
const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub task_id: String,
    pub status: &'static str,
    pub message: &'static str,
}

pub async fn upload_inventory(
    State(state): State<ApiState>,
    Path((branch_slug, branch_number)): Path<(String, String)>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut multipart =
        multipart.map_err(|_| ApiError::ValidationError("No file uploaded".to_string()))?;

    let mut filename = None;
    let mut bytes = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::ValidationError(e.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        filename = Some(field.file_name().unwrap_or_default().to_string());
        bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::ValidationError(e.body_text()))?
            .to_vec();
        break;
    }

    let task_id = state
        .orchestrator
        .submit_upload(&branch_slug, &branch_number, filename.as_deref(), &bytes)
        .await?;

    info!(
        task_id = %task_id,
        branch = %branch_slug,
        number = %branch_number,
        size = bytes.len(),
        "Upload accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            task_id,
            status: "processing",
            message: "File processing started",
        }),
    ))
}
