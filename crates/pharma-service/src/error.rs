use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use pharma_ingest::IngestError;
use pharma_storage::StorageError;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(msg) => Self::ValidationError(msg),
            IngestError::UnknownBranch(_) => Self::ValidationError(err.to_string()),
            IngestError::Storage(err) => Self::from(err),
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            _ => {
                tracing::error!("Storage error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!("Blocking task failed: {:?}", err);
        Self::InternalError("Internal server error".to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_ingest_error_to_api_error_conversion() {
        let api_error = ApiError::from(IngestError::Validation("No file uploaded".to_string()));
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "No file uploaded"));

        let api_error = ApiError::from(IngestError::UnknownBranch("apteka".to_string()));
        assert!(
            matches!(api_error, ApiError::ValidationError(msg) if msg == "Invalid pharmacy: apteka")
        );

        let api_error = ApiError::from(IngestError::Join("panicked".to_string()));
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_storage_error_to_api_error_conversion() {
        let api_error = ApiError::from(StorageError::NotFound("task".to_string()));
        assert!(matches!(api_error, ApiError::NotFound(_)));

        let api_error = ApiError::from(StorageError::Key("bad key".to_string()));
        assert!(matches!(api_error, ApiError::InternalError(msg) if msg == "Internal server error"));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("server error".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::NotFound("not found".to_string()),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::ValidationError("invalid input".to_string()),
            StatusCode::BAD_REQUEST,
        );
    }
}
