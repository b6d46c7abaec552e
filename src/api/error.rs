//! API error types with structured JSON responses.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::orchestrator::CascadeError;
use crate::pipeline::seizure::SeizureError;
use crate::pipeline::stages::StageError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,
    #[error("Unsupported file type: {0}")]
    UnsupportedFile(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid CSV")]
    InvalidCsv(String),
    #[error("Invalid image: {0}")]
    InvalidImage(String),
    #[error("Subtype parameter required")]
    MissingSubtype,
    #[error("Unknown subtype: {0}")]
    UnknownSubtype(String),
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("{0} stage is not configured")]
    StageUnavailable(&'static str),
    #[error("Timed out: {0}")]
    Timeout(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::NoFile => (
                StatusCode::BAD_REQUEST,
                "NO_FILE",
                "No file uploaded".to_string(),
            ),
            ApiError::UnsupportedFile(detail) => (
                StatusCode::BAD_REQUEST,
                "UNSUPPORTED_FILE",
                detail.clone(),
            ),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                detail.clone(),
            ),
            ApiError::InvalidCsv(detail) => (
                StatusCode::BAD_REQUEST,
                "INVALID_CSV",
                detail.clone(),
            ),
            ApiError::InvalidImage(detail) => (
                StatusCode::BAD_REQUEST,
                "INVALID_IMAGE",
                detail.clone(),
            ),
            ApiError::MissingSubtype => (
                StatusCode::BAD_REQUEST,
                "SUBTYPE_REQUIRED",
                "Subtype parameter required".to_string(),
            ),
            ApiError::UnknownSubtype(name) => (
                StatusCode::BAD_REQUEST,
                "UNKNOWN_SUBTYPE",
                format!("Unknown subtype: {name}"),
            ),
            ApiError::ModelUnavailable(detail) => {
                tracing::error!(detail, "Final-stage model unavailable");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "MODEL_UNAVAILABLE",
                    detail.clone(),
                )
            }
            ApiError::StageUnavailable(stage) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "STAGE_UNAVAILABLE",
                format!("The {stage} stage is not configured on this server"),
            ),
            ApiError::Timeout(detail) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                detail.clone(),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::InvalidImage(e) => ApiError::InvalidImage(e.to_string()),
            CascadeError::Stage(StageError::Transform(e)) => ApiError::InvalidImage(e.to_string()),
            CascadeError::UnknownSubtype(name) => ApiError::UnknownSubtype(name),
            CascadeError::ModelUnavailable { subtype, .. } => {
                ApiError::ModelUnavailable(format!("Model unavailable for subtype {subtype}"))
            }
            CascadeError::Seizure(
                e @ (SeizureError::Csv(_) | SeizureError::NoRows | SeizureError::NoFeatures),
            ) => ApiError::InvalidCsv(e.to_string()),
            CascadeError::StageUnavailable(stage) => ApiError::StageUnavailable(stage),
            e @ CascadeError::Timeout { .. } => ApiError::Timeout(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::BadRequest(format!("Malformed upload: {}", err.body_text()))
    }
}
