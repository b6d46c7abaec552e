//! `POST /epilepsy`: tabular seizure screen.

use axum::extract::{Multipart, State};
use axum::Json;

use super::upload::{UploadForm, UploadKind};
use crate::api::error::ApiError;
use crate::api::types::{ApiContext, EpilepsyResponse};

pub async fn screen(
    State(ctx): State<ApiContext>,
    multipart: Multipart,
) -> Result<Json<EpilepsyResponse>, ApiError> {
    let file = UploadForm::read(multipart).await?.take_file()?;
    if file.kind != Some(UploadKind::Csv) {
        return Err(ApiError::UnsupportedFile(
            "Only CSV files supported for seizure screening".into(),
        ));
    }
    let labels = ctx.cascade.screen_seizure(file.bytes).await?;
    Ok(Json(EpilepsyResponse::from_labels(labels)))
}
