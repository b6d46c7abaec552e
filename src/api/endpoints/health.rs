//! Liveness endpoints.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::{ApiContext, MessageResponse};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub started_at: String,
    pub seizure_screen: bool,
    pub csv_reference: bool,
    pub cached_final_models: usize,
}

/// `GET /`: plain liveness message.
pub async fn root() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Backend is running",
    })
}

/// `GET /health`: version and which optional stages are loaded.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        started_at: ctx.core.started_at.to_rfc3339(),
        seizure_screen: ctx.core.seizure().is_some(),
        csv_reference: ctx.core.csv_reference().is_some(),
        cached_final_models: ctx.core.cached_final_models(),
    })
}
