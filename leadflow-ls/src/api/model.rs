//! Model management endpoints

use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

/// Model reload response
#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub reloaded: bool,
}

/// POST /model/reload
///
/// Re-reads the model artifact from its configured path and swaps it in.
/// In-flight predictions finish on the model they started with.
pub async fn reload_model(State(state): State<AppState>) -> ApiResult<Json<ReloadResponse>> {
    state.scorer.reload(&state.model_path).await?;
    Ok(Json(ReloadResponse { reloaded: true }))
}

/// Build model management routes
pub fn model_routes() -> Router<AppState> {
    Router::new().route("/model/reload", post(reload_model))
}
