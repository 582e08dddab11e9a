//! leadflow-ls library interface
//!
//! Lead scoring service: ingests leads from dealer CRMs, reconciles them
//! into a local store, derives features, scores conversion likelihood and
//! writes scores back to the store and the CRMs.

pub mod api;
pub mod connectors;
pub mod db;
pub mod error;
pub mod features;
pub mod ingest;
pub mod reconcile;
pub mod scoring;
pub mod training;
pub mod writeback;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use scoring::ScorerHandle;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use writeback::WritebackOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Currently loaded scoring model
    pub scorer: ScorerHandle,
    /// Score fan-out to the store and the CRMs
    pub writeback: Arc<WritebackOrchestrator>,
    /// Model artifact path, re-read on /model/reload
    pub model_path: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        scorer: ScorerHandle,
        writeback: Arc<WritebackOrchestrator>,
        model_path: PathBuf,
    ) -> Self {
        Self {
            db,
            scorer,
            writeback,
            model_path,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::predict_routes())
        .merge(api::model_routes())
        .merge(api::health_routes())
        .with_state(state)
}
