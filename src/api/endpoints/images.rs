//! `POST /classify` (family) and `POST /subtype`.

use axum::extract::{Multipart, State};
use axum::Json;

use super::upload::UploadForm;
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, ClassifyResponse, SubtypeResponse};

pub async fn classify(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<ClassifyResponse>, ApiError> {
    let image = UploadForm::read(multipart)
        .await?
        .take_file()?
        .into_image("classification")?;
    let result = ctx.cascade.classify_family(image).await?;
    Ok(Json(ClassifyResponse {
        class_label: result.label,
        confidence: result.confidence,
    }))
}

pub async fn subtype(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<SubtypeResponse>, ApiError> {
    let image = UploadForm::read(multipart)
        .await?
        .take_file()?
        .into_image("subtype classification")?;
    let result = ctx.cascade.classify_subtype(image).await?;
    Ok(Json(SubtypeResponse {
        subtype_prediction: result.label,
        subtype_confidence: result.confidence,
    }))
}
