//! Prediction endpoint
//!
//! Scores one lead on demand. The stored lead view is authoritative when the
//! lead is already ingested; request fields only fill columns the store does
//! not have yet, so a CRM that pushes a brand-new lead for scoring before
//! the next ingest cycle still gets an answer.

use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{leads, vehicles, Vehicle};
use crate::error::{ApiError, ApiResult};
use crate::features::{features, LeadView};
use crate::AppState;
use leadflow_common::model::{CrmSource, LeadStatus};

/// Prediction request
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// CRM the lead lives in, case-insensitive ("VinSolutions", "CDK", ...)
    pub source: String,
    pub source_lead_id: String,
    /// Required only when the lead is not in the store yet
    pub created_at: Option<DateTime<Utc>>,
    /// Source-native vehicle id; resolves stored vehicle columns for a lead
    /// not yet in the store
    pub vehicle_id: Option<String>,
    pub initial_message: Option<String>,
    pub lead_source_platform: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_price: Option<f64>,
    pub vehicle_mileage: Option<f64>,
    pub days_on_lot: Option<i64>,
    /// Scoring instant; defaults to the request's reception time
    pub as_of: Option<DateTime<Utc>>,
}

/// Prediction response
#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub source_lead_id: String,
    pub likelihood_score: f64,
    /// Whether the score landed in the local store
    pub internal_persisted: bool,
    /// Whether the origin CRM accepted the score
    pub external_delivered: bool,
}

/// POST /predict
pub async fn predict(
    State(state): State<AppState>,
    Json(request): Json<PredictRequest>,
) -> ApiResult<Json<PredictResponse>> {
    let source: CrmSource = request
        .source
        .parse()
        .map_err(|e: leadflow_common::Error| ApiError::BadRequest(e.to_string()))?;

    let stored = leads::load_view(&state.db, source, &request.source_lead_id).await?;

    // An unstored lead can still name a vehicle the ingest side already
    // knows; its columns then stand in for inline vehicle fields
    let known_vehicle = match (&stored, &request.vehicle_id) {
        (None, Some(vehicle_id)) => {
            vehicles::find_by_source_vehicle_id(&state.db, vehicle_id).await?
        }
        _ => None,
    };

    let view = merge_view(source, &request, stored, known_vehicle)?;

    let as_of = request.as_of.unwrap_or_else(Utc::now);
    let feature_vector = features(&view, as_of)?;
    let score = state.scorer.score(&feature_vector).await?;

    let outcome = state
        .writeback
        .write_score(source, &request.source_lead_id, score)
        .await;

    info!(
        source = source.as_str(),
        source_lead_id = %request.source_lead_id,
        score,
        internal = outcome.internal_persisted,
        external = outcome.external_delivered,
        "Lead scored"
    );

    Ok(Json(PredictResponse {
        source_lead_id: request.source_lead_id.clone(),
        likelihood_score: score,
        internal_persisted: outcome.internal_persisted,
        external_delivered: outcome.external_delivered,
    }))
}

/// Overlay request fields onto the stored view
///
/// Stored columns win; request fields fill gaps only. Without a stored lead
/// the request must carry `created_at`, and vehicle columns come from the
/// resolved vehicle first, inline request fields second.
fn merge_view(
    source: CrmSource,
    request: &PredictRequest,
    stored: Option<LeadView>,
    known_vehicle: Option<Vehicle>,
) -> Result<LeadView, ApiError> {
    match stored {
        Some(mut view) => {
            view.initial_message = view.initial_message.or_else(|| request.initial_message.clone());
            view.lead_source_platform = view
                .lead_source_platform
                .or_else(|| request.lead_source_platform.clone());
            view.vehicle_make = view.vehicle_make.or_else(|| request.vehicle_make.clone());
            view.vehicle_price = view.vehicle_price.or(request.vehicle_price);
            view.vehicle_mileage = view.vehicle_mileage.or(request.vehicle_mileage);
            view.days_on_lot = view.days_on_lot.or(request.days_on_lot);
            Ok(view)
        }
        None => {
            let created_at = request.created_at.ok_or_else(|| {
                ApiError::BadRequest(
                    "created_at is required for a lead not yet in the store".to_string(),
                )
            })?;
            let (make, price, mileage, lot) = match known_vehicle {
                Some(v) => (v.make, v.price, v.mileage, v.days_on_lot),
                None => (None, None, None, None),
            };
            Ok(LeadView {
                source,
                source_lead_id: request.source_lead_id.clone(),
                status: LeadStatus::New,
                created_at,
                closed_at: None,
                converted: None,
                initial_message: request.initial_message.clone(),
                lead_source_platform: request.lead_source_platform.clone(),
                vehicle_make: make.or_else(|| request.vehicle_make.clone()),
                vehicle_price: price.or(request.vehicle_price),
                vehicle_mileage: mileage.or(request.vehicle_mileage),
                days_on_lot: lot.or(request.days_on_lot),
            })
        }
    }
}

/// Build prediction routes
pub fn predict_routes() -> Router<AppState> {
    Router::new().route("/predict", post(predict))
}
