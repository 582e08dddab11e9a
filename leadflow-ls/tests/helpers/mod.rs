//! Shared test fixtures: scripted connectors, seeded records, model artifacts
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_common::db::init_database;
use leadflow_common::model::{
    CrmSource, LeadDetails, StandardizedFields, StandardizedRecord, VehicleDetails,
};
use leadflow_ls::connectors::{ConnectorError, ConnectorRegistry, CrmConnector};
use leadflow_ls::features::{CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use leadflow_ls::scoring::{ColumnScaler, LogisticModel};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Connector double driven by a mutable batch of canned records
pub struct ScriptedConnector {
    pub crm: CrmSource,
    pub batch: Mutex<Vec<StandardizedRecord>>,
    /// When true every score push fails
    pub fail_score: bool,
    pub score_calls: AtomicU32,
    pub last_score: Mutex<Option<f64>>,
}

impl ScriptedConnector {
    pub fn new(crm: CrmSource) -> Self {
        Self {
            crm,
            batch: Mutex::new(Vec::new()),
            fail_score: false,
            score_calls: AtomicU32::new(0),
            last_score: Mutex::new(None),
        }
    }

    pub fn failing_writeback(crm: CrmSource) -> Self {
        Self {
            fail_score: true,
            ..Self::new(crm)
        }
    }

    pub fn set_batch(&self, records: Vec<StandardizedRecord>) {
        *self.batch.lock().unwrap() = records;
    }
}

#[async_trait]
impl CrmConnector for ScriptedConnector {
    fn source(&self) -> CrmSource {
        self.crm
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn fetch_new_records(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<StandardizedRecord>, ConnectorError> {
        Ok(self.batch.lock().unwrap().clone())
    }

    async fn fetch_record_details(
        &self,
        source_lead_id: &str,
    ) -> Result<LeadDetails, ConnectorError> {
        Ok(LeadDetails {
            source_lead_id: source_lead_id.to_string(),
            assigned_salesperson_id: None,
            extra: serde_json::Value::Null,
        })
    }

    async fn fetch_vehicle_details(
        &self,
        source_vehicle_id: &str,
    ) -> Result<VehicleDetails, ConnectorError> {
        Ok(VehicleDetails {
            source_vehicle_id: source_vehicle_id.to_string(),
            vin: Some(format!("VIN-{}", source_vehicle_id)),
            make: Some("Toyota".to_string()),
            model: Some("Camry".to_string()),
            year: Some(2021),
            price: Some(25000.0),
            mileage: Some(30000.0),
            days_on_lot: Some(45),
        })
    }

    async fn update_lead_score(
        &self,
        _source_lead_id: &str,
        score: f64,
    ) -> Result<(), ConnectorError> {
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_score {
            Err(ConnectorError::Writeback("CRM rejected the update".into()))
        } else {
            *self.last_score.lock().unwrap() = Some(score);
            Ok(())
        }
    }
}

/// Registry over already constructed doubles
pub fn registry_of(connectors: Vec<Arc<ScriptedConnector>>) -> ConnectorRegistry {
    connectors
        .into_iter()
        .map(|c| (c.crm, c as Arc<dyn CrmConnector>))
        .collect()
}

/// A standardized record as the connectors would emit it
pub fn standardized_record(
    crm: CrmSource,
    lead_id: &str,
    status: &str,
    created_at: DateTime<Utc>,
    vehicle_id: &str,
) -> StandardizedRecord {
    StandardizedRecord {
        source: crm,
        source_lead_id: lead_id.to_string(),
        raw_payload: serde_json::json!({"id": lead_id, "status": status}),
        standardized: StandardizedFields {
            created_at: Some(created_at),
            updated_at: Some(created_at),
            status_raw: Some(status.to_string()),
            initial_message: Some("Is this still available?".to_string()),
            vehicle_ref_id: Some(vehicle_id.to_string()),
            vehicle_make: Some("Toyota".to_string()),
            vehicle_model: Some("Camry".to_string()),
            customer_ref_id: Some("C-1".to_string()),
            lead_source_platform: Some("Facebook Marketplace".to_string()),
        },
    }
}

/// Fresh on-disk test database
pub async fn test_pool(name: &str) -> SqlitePool {
    let path = format!("/tmp/leadflow-it-{}-{}.db", name, std::process::id());
    let _ = std::fs::remove_file(&path);
    init_database(std::path::Path::new(&path)).await.unwrap()
}

/// Zero-weight model scoring sigmoid(bias) for any input
pub fn constant_model(bias: f64) -> LogisticModel {
    LogisticModel {
        numeric_columns: NUMERIC_FEATURES.iter().map(|s| s.to_string()).collect(),
        categorical_columns: CATEGORICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
        scalers: vec![ColumnScaler { mean: 0.0, std: 1.0 }; NUMERIC_FEATURES.len()],
        numeric_weights: vec![0.0; NUMERIC_FEATURES.len()],
        categorical_weights: vec![HashMap::new(); CATEGORICAL_FEATURES.len()],
        bias,
        trained_at: Utc::now(),
        trained_on: 0,
    }
}
