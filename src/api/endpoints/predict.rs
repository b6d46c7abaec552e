//! `POST /predict`: modality gate.
//!
//! Images go through the gate model. CSV uploads never reach a model: a
//! tabular file that passes validation is accepted as in scope.

use axum::extract::{Multipart, State};
use axum::Json;

use super::upload::{UploadForm, UploadKind};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, PredictResponse};
use crate::pipeline::stages::MODALITY_IN_SCOPE;

pub async fn predict(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let file = UploadForm::read(multipart).await?.take_file()?;

    match file.kind {
        Some(UploadKind::Image) => {
            let result = ctx.cascade.screen_modality(file.bytes).await?;
            Ok(Json(PredictResponse {
                prediction: result.label,
                confidence: Some(result.confidence),
            }))
        }
        Some(UploadKind::Csv) => {
            if !ctx.cascade.accepts_csv(&file.bytes) {
                return Err(ApiError::InvalidCsv(format!(
                    "{} does not match the expected tabular layout",
                    file.file_name
                )));
            }
            Ok(Json(PredictResponse {
                prediction: MODALITY_IN_SCOPE.to_string(),
                confidence: None,
            }))
        }
        None => Err(ApiError::UnsupportedFile(format!(
            "Unsupported file type: {}",
            file.file_name
        ))),
    }
}
