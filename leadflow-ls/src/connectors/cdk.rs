//! CDK connector
//!
//! CDK's lead feed is PascalCase with the vehicle of interest under
//! `VehicleOfInterest`:
//!
//! ```json
//! {
//!   "Records": [{
//!     "LeadId": "77-A", "Status": "Contacted",
//!     "CreatedUtc": "...", "ModifiedUtc": "...",
//!     "SourceChannel": "Facebook Marketplace",
//!     "Comments": "Do you offer financing?",
//!     "Customer": {"Id": "CU-3"},
//!     "VehicleOfInterest": {"StockNumber": "S-550", "Make": "Ford", "Model": "F-150"}
//!   }]
//! }
//! ```

use super::{json_id, json_timestamp, ConnectorError, CrmConnector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_common::config::ConnectorConfig;
use leadflow_common::model::{
    CrmSource, LeadDetails, StandardizedFields, StandardizedRecord, VehicleDetails,
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// CDK API connector
pub struct CdkConnector {
    config: ConnectorConfig,
    session: Mutex<Option<reqwest::Client>>,
}

impl CdkConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<reqwest::Client, ConnectorError> {
        self.session
            .lock()
            .await
            .clone()
            .ok_or_else(|| ConnectorError::Connection("CDK: not connected".to_string()))
    }
}

/// Map one raw CDK record to the canonical record
pub fn standardize(raw: &serde_json::Value) -> Result<StandardizedRecord, ConnectorError> {
    let source_lead_id = json_id(&raw["LeadId"])
        .ok_or_else(|| ConnectorError::Fetch("CDK record without LeadId".to_string()))?;

    let standardized = StandardizedFields {
        created_at: json_timestamp(&raw["CreatedUtc"]),
        updated_at: json_timestamp(&raw["ModifiedUtc"]),
        status_raw: raw["Status"].as_str().map(str::to_string),
        initial_message: raw["Comments"].as_str().map(str::to_string),
        vehicle_ref_id: json_id(&raw["VehicleOfInterest"]["StockNumber"]),
        vehicle_make: raw["VehicleOfInterest"]["Make"].as_str().map(str::to_string),
        vehicle_model: raw["VehicleOfInterest"]["Model"].as_str().map(str::to_string),
        customer_ref_id: json_id(&raw["Customer"]["Id"]),
        lead_source_platform: raw["SourceChannel"].as_str().map(str::to_string),
    };

    Ok(StandardizedRecord {
        source: CrmSource::Cdk,
        source_lead_id,
        raw_payload: raw.clone(),
        standardized,
    })
}

#[derive(Debug, Deserialize)]
struct CdkRecordList {
    #[serde(rename = "Records")]
    records: Vec<serde_json::Value>,
}

#[async_trait]
impl CrmConnector for CdkConnector {
    fn source(&self) -> CrmSource {
        CrmSource::Cdk
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        if self.config.api_url.trim().is_empty() || self.config.api_key.trim().is_empty() {
            return Err(ConnectorError::Connection(
                "CDK: api_url/api_key not configured".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "X-Api-Key",
            self.config
                .api_key
                .parse()
                .map_err(|_| ConnectorError::Connection("CDK: bad api_key".to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        info!("Connected to CDK");
        *session = Some(client);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.take().is_some() {
            debug!("Disconnected from CDK");
        }
    }

    async fn fetch_new_records(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StandardizedRecord>, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/elead/v1/leads", self.config.api_url);

        let response = client
            .get(&url)
            .query(&[("modifiedSince", since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Fetch(format!(
                "CDK leads endpoint returned {}",
                response.status()
            )));
        }

        let list: CdkRecordList = response
            .json()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        let mut records = Vec::with_capacity(list.records.len());
        for raw in &list.records {
            match standardize(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping unidentifiable CDK record"),
            }
        }

        info!(count = records.len(), "Fetched CDK leads");
        Ok(records)
    }

    async fn fetch_record_details(
        &self,
        source_lead_id: &str,
    ) -> Result<LeadDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/elead/v1/leads/{}", self.config.api_url, source_lead_id);

        let body: serde_json::Value = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        Ok(LeadDetails {
            source_lead_id: source_lead_id.to_string(),
            assigned_salesperson_id: json_id(&body["AssignedTo"]),
            extra: body,
        })
    }

    async fn fetch_vehicle_details(
        &self,
        source_vehicle_id: &str,
    ) -> Result<VehicleDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!(
            "{}/inventory/v1/vehicles/{}",
            self.config.api_url, source_vehicle_id
        );

        let body: serde_json::Value = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?
            .json()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        Ok(VehicleDetails {
            source_vehicle_id: json_id(&body["StockNumber"])
                .unwrap_or_else(|| source_vehicle_id.to_string()),
            vin: body["Vin"].as_str().map(str::to_string),
            make: body["Make"].as_str().map(str::to_string),
            model: body["Model"].as_str().map(str::to_string),
            year: body["ModelYear"].as_i64(),
            price: body["ListPrice"].as_f64(),
            mileage: body["Odometer"].as_f64(),
            days_on_lot: body["DaysInStock"].as_i64(),
        })
    }

    async fn update_lead_score(
        &self,
        source_lead_id: &str,
        score: f64,
    ) -> Result<(), ConnectorError> {
        let client = self.client().await?;
        let url = format!(
            "{}/elead/v1/leads/{}/fields",
            self.config.api_url, source_lead_id
        );

        let response = client
            .put(&url)
            .json(&serde_json::json!({
                "FieldName": "PredictedLikelihood",
                "FieldValue": format!("{:.4}", score),
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::Writeback(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Writeback(format!(
                "CDK score update returned {}",
                response.status()
            )));
        }

        debug!(lead = source_lead_id, score, "Score written back to CDK");
        Ok(())
    }
}
