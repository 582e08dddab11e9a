//! Reynolds connector
//!
//! Reynolds uses snake_case payloads and calls vehicles "units":
//!
//! ```json
//! {
//!   "leads": [{
//!     "lead_number": 4410, "state": "negotiation",
//!     "entered_on": "...", "changed_on": "...",
//!     "channel": "facebook_marketplace",
//!     "first_message": "What's the lowest you'll go?",
//!     "customer_ref": "R-88",
//!     "unit": {"unit_id": "U-12", "make": "Honda", "model": "Civic"}
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
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reynolds API connector
pub struct ReynoldsConnector {
    config: ConnectorConfig,
    session: Mutex<Option<reqwest::Client>>,
}

impl ReynoldsConnector {
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
            .ok_or_else(|| ConnectorError::Connection("Reynolds: not connected".to_string()))
    }
}

/// Map one raw Reynolds lead payload to the canonical record
pub fn standardize(raw: &serde_json::Value) -> Result<StandardizedRecord, ConnectorError> {
    let source_lead_id = json_id(&raw["lead_number"])
        .ok_or_else(|| ConnectorError::Fetch("Reynolds lead without lead_number".to_string()))?;

    let standardized = StandardizedFields {
        created_at: json_timestamp(&raw["entered_on"]),
        updated_at: json_timestamp(&raw["changed_on"]),
        status_raw: raw["state"].as_str().map(str::to_string),
        initial_message: raw["first_message"].as_str().map(str::to_string),
        vehicle_ref_id: json_id(&raw["unit"]["unit_id"]),
        vehicle_make: raw["unit"]["make"].as_str().map(str::to_string),
        vehicle_model: raw["unit"]["model"].as_str().map(str::to_string),
        customer_ref_id: json_id(&raw["customer_ref"]),
        lead_source_platform: raw["channel"].as_str().map(str::to_string),
    };

    Ok(StandardizedRecord {
        source: CrmSource::Reynolds,
        source_lead_id,
        raw_payload: raw.clone(),
        standardized,
    })
}

#[async_trait]
impl CrmConnector for ReynoldsConnector {
    fn source(&self) -> CrmSource {
        CrmSource::Reynolds
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        if self.config.api_url.trim().is_empty() || self.config.api_key.trim().is_empty() {
            return Err(ConnectorError::Connection(
                "Reynolds: api_url/api_key not configured".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            auth.parse()
                .map_err(|_| ConnectorError::Connection("Reynolds: bad api_key".to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        info!("Connected to Reynolds");
        *session = Some(client);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.take().is_some() {
            debug!("Disconnected from Reynolds");
        }
    }

    async fn fetch_new_records(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StandardizedRecord>, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/api/leads", self.config.api_url);

        let response = client
            .get(&url)
            .query(&[("changed_since", since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Fetch(format!(
                "Reynolds leads endpoint returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        let raw_leads = body["leads"].as_array().cloned().unwrap_or_default();
        let mut records = Vec::with_capacity(raw_leads.len());
        for raw in &raw_leads {
            match standardize(raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping unidentifiable Reynolds lead"),
            }
        }

        info!(count = records.len(), "Fetched Reynolds leads");
        Ok(records)
    }

    async fn fetch_record_details(
        &self,
        source_lead_id: &str,
    ) -> Result<LeadDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/api/leads/{}", self.config.api_url, source_lead_id);

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
            assigned_salesperson_id: json_id(&body["salesperson"]),
            extra: body,
        })
    }

    async fn fetch_vehicle_details(
        &self,
        source_vehicle_id: &str,
    ) -> Result<VehicleDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/api/units/{}", self.config.api_url, source_vehicle_id);

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
            source_vehicle_id: json_id(&body["unit_id"])
                .unwrap_or_else(|| source_vehicle_id.to_string()),
            vin: body["vin"].as_str().map(str::to_string),
            make: body["make"].as_str().map(str::to_string),
            model: body["model"].as_str().map(str::to_string),
            year: body["year"].as_i64(),
            price: body["asking_price"].as_f64(),
            mileage: body["miles"].as_f64(),
            days_on_lot: body["days_on_lot"].as_i64(),
        })
    }

    async fn update_lead_score(
        &self,
        source_lead_id: &str,
        score: f64,
    ) -> Result<(), ConnectorError> {
        let client = self.client().await?;
        let url = format!(
            "{}/api/leads/{}/custom_fields",
            self.config.api_url, source_lead_id
        );

        let response = client
            .put(&url)
            .json(&serde_json::json!({
                "name": "predicted_likelihood",
                "value": format!("{:.4}", score),
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::Writeback(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Writeback(format!(
                "Reynolds score update returned {}",
                response.status()
            )));
        }

        debug!(lead = source_lead_id, score, "Score written back to Reynolds");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardizes_snake_case_payload() {
        let raw = serde_json::json!({
            "lead_number": 4410,
            "state": "negotiation",
            "entered_on": "2024-03-03T08:00:00Z",
            "changed_on": "2024-03-03T11:00:00Z",
            "channel": "facebook_marketplace",
            "first_message": "What's the lowest you'll go?",
            "customer_ref": "R-88",
            "unit": {"unit_id": "U-12", "make": "Honda", "model": "Civic"}
        });
        let record = standardize(&raw).unwrap();
        assert_eq!(record.source, CrmSource::Reynolds);
        // Numeric lead_number is canonicalized to a string
        assert_eq!(record.source_lead_id, "4410");
        assert_eq!(record.standardized.status_raw.as_deref(), Some("negotiation"));
        assert_eq!(record.standardized.vehicle_ref_id.as_deref(), Some("U-12"));
    }

    #[test]
    fn lead_without_number_is_rejected() {
        assert!(standardize(&serde_json::json!({"state": "new"})).is_err());
    }
}
