//! `POST /diagnose`: subtype-specific final model.
//!
//! The subtype comes from the `subtype` form field, falling back to the query
//! string. It is validated before the image is decoded or any checkpoint is
//! touched.

use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::Deserialize;

use super::upload::UploadForm;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, DiagnoseResponse};
use crate::pipeline::orchestrator::CascadeOrchestrator;

#[derive(Debug, Default, Deserialize)]
pub struct DiagnoseQuery {
    pub subtype: Option<String>,
}

pub async fn diagnose(
    State(ctx): State<ApiContext>,
    Query(query): Query<DiagnoseQuery>,
    multipart: Multipart,
) -> Result<Json<DiagnoseResponse>, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let file = form.take_file()?;

    let raw = form
        .field("subtype")
        .map(str::to_string)
        .or_else(|| query.subtype.filter(|s| !s.trim().is_empty()))
        .ok_or(ApiError::MissingSubtype)?;
    let subtype = CascadeOrchestrator::parse_subtype(&raw)?;

    let image = file.into_image("diagnosis")?;
    let diagnosis = ctx.cascade.diagnose(image, subtype).await?;

    Ok(Json(DiagnoseResponse {
        diagnosis: diagnosis.result.label,
        diagnosis_confidence: diagnosis.result.confidence,
        subtype: diagnosis.subtype,
    }))
}
