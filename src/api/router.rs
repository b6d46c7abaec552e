//! HTTP router for the cascade.
//!
//! Layers (outermost → innermost): CORS → body limit → access log → handler.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the cascade router over shared state.
pub fn cascade_router(core: Arc<CoreState>) -> Router {
    let max_upload = core.config.max_upload_bytes;
    let ctx = ApiContext::new(core);

    Router::new()
        .route("/", get(endpoints::health::root))
        .route("/health", get(endpoints::health::check))
        .route("/predict", post(endpoints::predict::predict))
        .route("/classify", post(endpoints::images::classify))
        .route("/subtype", post(endpoints::images::subtype))
        .route("/diagnose", post(endpoints::diagnose::diagnose))
        .route("/epilepsy", post(endpoints::epilepsy::screen))
        .with_state(ctx)
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CorsLayer::permissive())
}
