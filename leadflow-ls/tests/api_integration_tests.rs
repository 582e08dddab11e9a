//! Integration tests for the prediction API

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use helpers::{constant_model, registry_of, standardized_record, test_pool, ScriptedConnector};
use http_body_util::BodyExt;
use leadflow_common::config::IngestConfig;
use leadflow_common::model::CrmSource;
use leadflow_ls::db::{leads, vehicles, Vehicle};
use leadflow_ls::ingest::run_ingest;
use leadflow_ls::scoring::ScorerHandle;
use leadflow_ls::writeback::WritebackOrchestrator;
use leadflow_ls::AppState;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Test app over a scripted connector; optionally with no model loaded
async fn create_test_app(
    name: &str,
    connector: Arc<ScriptedConnector>,
    with_model: bool,
) -> (axum::Router, sqlx::SqlitePool) {
    let pool = test_pool(name).await;
    let connectors = registry_of(vec![connector]);

    let scorer = if with_model {
        ScorerHandle::with_model(constant_model(0.0))
    } else {
        ScorerHandle::empty()
    };

    let writeback = Arc::new(WritebackOrchestrator::new(pool.clone(), connectors, 2));
    let model_path = PathBuf::from(format!(
        "/tmp/leadflow-api-model-{}-{}.json",
        name,
        std::process::id()
    ));
    let state = AppState::new(pool.clone(), scorer, writeback, model_path);
    (leadflow_ls::build_router(state), pool)
}

/// Ingest one open lead so the store has a scorable view
async fn seed_open_lead(
    pool: &sqlx::SqlitePool,
    connector: &Arc<ScriptedConnector>,
    lead_id: &str,
) {
    connector.set_batch(vec![standardized_record(
        connector.crm,
        lead_id,
        "new",
        Utc::now() - Duration::hours(6),
        "V-1",
    )]);
    let config = IngestConfig {
        lookback_hours: 168,
        source_timeout_secs: 5,
    };
    let registry = registry_of(vec![connector.clone()]);
    let report = run_ingest(pool, &registry, &config, None).await;
    assert!(report.all_succeeded());
}

async fn post_json(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    use tower::util::ServiceExt;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn predict_scores_a_stored_lead_and_persists() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let (app, pool) = create_test_app("predict-ok", connector.clone(), true).await;
    seed_open_lead(&pool, &connector, "L-1").await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({"source": "VinSolutions", "source_lead_id": "L-1"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source_lead_id"], "L-1");
    let score = body["likelihood_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    assert_eq!(body["internal_persisted"], true);
    assert_eq!(body["external_delivered"], true);
    assert_eq!(connector.score_calls.load(Ordering::SeqCst), 1);

    let lead = leads::find_by_source_id(&pool, CrmSource::VinSolutions, "L-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.predicted_likelihood, Some(score));
}

#[tokio::test]
async fn predict_answers_even_when_the_crm_rejects_the_score() {
    let connector = Arc::new(ScriptedConnector::failing_writeback(CrmSource::VinSolutions));
    let (app, pool) = create_test_app("predict-crm-down", connector.clone(), true).await;
    seed_open_lead(&pool, &connector, "L-2").await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({"source": "vinsolutions", "source_lead_id": "L-2"}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["internal_persisted"], true);
    assert_eq!(body["external_delivered"], false);

    // The score is in the store despite the CRM failure
    let lead = leads::find_by_source_id(&pool, CrmSource::VinSolutions, "L-2")
        .await
        .unwrap()
        .unwrap();
    assert!(lead.predicted_likelihood.is_some());
}

#[tokio::test]
async fn predict_without_a_model_is_service_unavailable() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let (app, pool) = create_test_app("predict-no-model", connector.clone(), false).await;
    seed_open_lead(&pool, &connector, "L-3").await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({"source": "VinSolutions", "source_lead_id": "L-3"}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SCORING_UNAVAILABLE");
}

#[tokio::test]
async fn predict_unknown_lead_needs_created_at() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let (app, _pool) = create_test_app("predict-unknown", connector, true).await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({"source": "VinSolutions", "source_lead_id": "L-404"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn predict_unstored_lead_works_from_request_fields() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::Cdk));
    let (app, _pool) = create_test_app("predict-inline", connector, true).await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({
            "source": "CDK",
            "source_lead_id": "C-55",
            "created_at": (Utc::now() - Duration::hours(2)).to_rfc3339(),
            "vehicle_make": "Honda",
            "vehicle_price": 31000.0,
            "vehicle_mileage": 12000.0,
            "days_on_lot": 20
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["likelihood_score"].as_f64().is_some());
    // Nothing to persist to; the store has no such lead
    assert_eq!(body["internal_persisted"], false);
}

#[tokio::test]
async fn predict_unstored_lead_resolves_a_known_vehicle() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::Cdk));
    let (app, pool) = create_test_app("predict-vehicle-id", connector, true).await;

    // The ingest side already knows this stock unit
    let vehicle = Vehicle {
        guid: uuid::Uuid::new_v4(),
        source_vehicle_id: "STK-9".to_string(),
        vin: None,
        make: Some("Honda".to_string()),
        model: Some("Civic".to_string()),
        year: Some(2022),
        price: Some(28000.0),
        mileage: Some(9000.0),
        days_on_lot: Some(12),
    };
    vehicles::insert(&pool, &vehicle).await.unwrap();

    // No inline vehicle fields; naming the stored vehicle is enough
    let (status, body) = post_json(
        app,
        "/predict",
        json!({
            "source": "CDK",
            "source_lead_id": "C-60",
            "created_at": (Utc::now() - Duration::hours(3)).to_rfc3339(),
            "vehicle_id": "STK-9"
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["likelihood_score"].as_f64().is_some());
}

#[tokio::test]
async fn predict_missing_vehicle_data_names_the_column() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::Cdk));
    let (app, _pool) = create_test_app("predict-missing-col", connector, true).await;

    let (status, body) = post_json(
        app,
        "/predict",
        json!({
            "source": "CDK",
            "source_lead_id": "C-56",
            "created_at": (Utc::now() - Duration::hours(2)).to_rfc3339()
        }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"]["message"].as_str().unwrap();
    assert!(message.contains("vehicle_price"), "message: {}", message);
}

#[tokio::test]
async fn predict_rejects_unknown_sources() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let (app, _pool) = create_test_app("predict-bad-source", connector, true).await;

    let (status, _body) = post_json(
        app,
        "/predict",
        json!({"source": "SalesforceMaybe", "source_lead_id": "L-1"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_reports_model_state() {
    use tower::util::ServiceExt;

    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let (app, _pool) = create_test_app("health", connector, false).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["module"], "leadflow-ls");
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["model_loaded"], false);
}

#[tokio::test]
async fn model_reload_picks_up_a_new_artifact() {
    let connector = Arc::new(ScriptedConnector::new(CrmSource::VinSolutions));
    let pool = test_pool("reload").await;
    let connectors = registry_of(vec![connector]);

    let model_path = PathBuf::from(format!(
        "/tmp/leadflow-api-reload-{}.json",
        std::process::id()
    ));
    constant_model(2.0).save(&model_path).unwrap();

    let writeback = Arc::new(WritebackOrchestrator::new(pool.clone(), connectors, 2));
    let state = AppState::new(pool, ScorerHandle::empty(), writeback, model_path.clone());
    let scorer = state.scorer.clone();
    let app = leadflow_ls::build_router(state);

    assert!(!scorer.is_loaded().await);
    let (status, body) = post_json(app, "/model/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reloaded"], true);
    assert!(scorer.is_loaded().await);

    let _ = std::fs::remove_file(&model_path);
}
