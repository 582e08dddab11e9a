//! VinSolutions connector
//!
//! Lead list endpoint returns camelCase payloads with the vehicle of
//! interest inlined:
//!
//! ```json
//! {
//!   "leads": [{
//!     "id": "a1b2", "source": "Facebook", "status": "New",
//!     "createdAt": "...", "updatedAt": "...",
//!     "customer": {"id": "c9", "name": "..."},
//!     "vehicle_interest": {"id": 101, "make": "Toyota", "model": "Camry"},
//!     "initial_message": "Is this still available?"
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

/// VinSolutions API connector
pub struct VinSolutionsConnector {
    config: ConnectorConfig,
    session: Mutex<Option<reqwest::Client>>,
}

impl VinSolutionsConnector {
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
            .ok_or_else(|| ConnectorError::Connection("VinSolutions: not connected".to_string()))
    }
}

/// Map one raw VinSolutions lead payload to the canonical record
///
/// Pure; missing fields become explicit None.
pub fn standardize(raw: &serde_json::Value) -> Result<StandardizedRecord, ConnectorError> {
    let source_lead_id = json_id(&raw["id"])
        .ok_or_else(|| ConnectorError::Fetch("VinSolutions lead without id".to_string()))?;

    let standardized = StandardizedFields {
        created_at: json_timestamp(&raw["createdAt"]),
        updated_at: json_timestamp(&raw["updatedAt"]),
        status_raw: raw["status"].as_str().map(str::to_string),
        initial_message: raw["initial_message"].as_str().map(str::to_string),
        vehicle_ref_id: json_id(&raw["vehicle_interest"]["id"]),
        vehicle_make: raw["vehicle_interest"]["make"].as_str().map(str::to_string),
        vehicle_model: raw["vehicle_interest"]["model"].as_str().map(str::to_string),
        customer_ref_id: json_id(&raw["customer"]["id"]),
        lead_source_platform: raw["source"].as_str().map(str::to_string),
    };

    Ok(StandardizedRecord {
        source: CrmSource::VinSolutions,
        source_lead_id,
        raw_payload: raw.clone(),
        standardized,
    })
}

#[derive(Debug, Deserialize)]
struct VinLeadList {
    leads: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct VinVehicle {
    id: serde_json::Value,
    vin: Option<String>,
    make: Option<String>,
    model: Option<String>,
    year: Option<i64>,
    price: Option<f64>,
    mileage: Option<f64>,
    days_on_lot: Option<i64>,
}

#[async_trait]
impl CrmConnector for VinSolutionsConnector {
    fn source(&self) -> CrmSource {
        CrmSource::VinSolutions
    }

    async fn connect(&self) -> Result<(), ConnectorError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        if self.config.api_url.trim().is_empty() || self.config.api_key.trim().is_empty() {
            return Err(ConnectorError::Connection(
                "VinSolutions: api_url/api_key not configured".to_string(),
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", self.config.api_key);
        headers.insert(
            reqwest::header::AUTHORIZATION,
            auth.parse()
                .map_err(|_| ConnectorError::Connection("VinSolutions: bad api_key".to_string()))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        info!("Connected to VinSolutions");
        *session = Some(client);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if session.take().is_some() {
            debug!("Disconnected from VinSolutions");
        }
    }

    async fn fetch_new_records(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StandardizedRecord>, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/leads", self.config.api_url);

        let response = client
            .get(&url)
            .query(&[("created_since", since.to_rfc3339())])
            .send()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Fetch(format!(
                "VinSolutions /leads returned {}",
                response.status()
            )));
        }

        let list: VinLeadList = response
            .json()
            .await
            .map_err(|e| ConnectorError::Fetch(e.to_string()))?;

        let mut records = Vec::with_capacity(list.leads.len());
        for raw in &list.leads {
            match standardize(raw) {
                Ok(record) => records.push(record),
                // A payload without identity cannot be reconciled; drop it
                // without aborting the rest of the page
                Err(e) => warn!(error = %e, "Skipping unidentifiable VinSolutions lead"),
            }
        }

        info!(count = records.len(), "Fetched VinSolutions leads");
        Ok(records)
    }

    async fn fetch_record_details(
        &self,
        source_lead_id: &str,
    ) -> Result<LeadDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/leads/{}", self.config.api_url, source_lead_id);

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
            assigned_salesperson_id: json_id(&body["assigned_salesperson_id"]),
            extra: body,
        })
    }

    async fn fetch_vehicle_details(
        &self,
        source_vehicle_id: &str,
    ) -> Result<VehicleDetails, ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/vehicles/{}", self.config.api_url, source_vehicle_id);

        let vehicle: VinVehicle = client
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
            source_vehicle_id: json_id(&vehicle.id)
                .unwrap_or_else(|| source_vehicle_id.to_string()),
            vin: vehicle.vin,
            make: vehicle.make,
            model: vehicle.model,
            year: vehicle.year,
            price: vehicle.price,
            mileage: vehicle.mileage,
            days_on_lot: vehicle.days_on_lot,
        })
    }

    async fn update_lead_score(
        &self,
        source_lead_id: &str,
        score: f64,
    ) -> Result<(), ConnectorError> {
        let client = self.client().await?;
        let url = format!("{}/leads/{}/score", self.config.api_url, source_lead_id);

        let response = client
            .put(&url)
            .json(&serde_json::json!({
                "custom_field_name": "Predicted_Likelihood",
                "value": format!("{:.4}", score),
            }))
            .send()
            .await
            .map_err(|e| ConnectorError::Writeback(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ConnectorError::Writeback(format!(
                "VinSolutions score update returned {}",
                response.status()
            )));
        }

        debug!(lead = source_lead_id, score, "Score written back to VinSolutions");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lead() -> serde_json::Value {
        serde_json::json!({
            "id": "a1b2",
            "source": "Facebook",
            "status": "New",
            "createdAt": "2024-03-01T12:00:00Z",
            "updatedAt": "2024-03-01T13:30:00Z",
            "customer": {"id": "c9", "name": "Customer a1b2"},
            "vehicle_interest": {"id": 101, "make": "Toyota", "model": "Camry"},
            "initial_message": "Is this still available?"
        })
    }

    #[test]
    fn standardizes_sample_payload() {
        let raw = sample_lead();
        let record = standardize(&raw).unwrap();
        assert_eq!(record.source, CrmSource::VinSolutions);
        assert_eq!(record.source_lead_id, "a1b2");
        assert_eq!(record.standardized.status_raw.as_deref(), Some("New"));
        assert_eq!(record.standardized.vehicle_ref_id.as_deref(), Some("101"));
        assert_eq!(record.standardized.customer_ref_id.as_deref(), Some("c9"));
        assert_eq!(
            record.standardized.lead_source_platform.as_deref(),
            Some("Facebook")
        );
        assert!(record.standardized.created_at.is_some());
        // Raw payload preserved verbatim
        assert_eq!(record.raw_payload, raw);
    }

    #[test]
    fn missing_fields_become_explicit_none() {
        let record = standardize(&serde_json::json!({"id": "x"})).unwrap();
        assert_eq!(record.standardized.status_raw, None);
        assert_eq!(record.standardized.vehicle_ref_id, None);
        assert_eq!(record.standardized.initial_message, None);
        assert_eq!(record.standardized.created_at, None);
    }

    #[test]
    fn payload_without_id_is_rejected() {
        assert!(standardize(&serde_json::json!({"status": "New"})).is_err());
    }

    #[test]
    fn standardize_does_not_mutate_input() {
        let raw = sample_lead();
        let before = raw.clone();
        let _ = standardize(&raw).unwrap();
        assert_eq!(raw, before);
    }

    #[tokio::test]
    async fn fetch_before_connect_is_a_connection_error() {
        let connector = VinSolutionsConnector::new(ConnectorConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
            timeout_secs: 1,
        });
        let result = connector.fetch_new_records(Utc::now()).await;
        assert!(matches!(result, Err(ConnectorError::Connection(_))));
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_disconnect_is_safe() {
        let connector = VinSolutionsConnector::new(ConnectorConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
            timeout_secs: 1,
        });
        // Safe while not connected
        connector.disconnect().await;
        connector.connect().await.unwrap();
        connector.connect().await.unwrap();
        connector.disconnect().await;
        connector.disconnect().await;
    }

    #[tokio::test]
    async fn connect_without_credentials_fails() {
        let connector = VinSolutionsConnector::new(ConnectorConfig {
            api_url: String::new(),
            api_key: String::new(),
            timeout_secs: 1,
        });
        assert!(matches!(
            connector.connect().await,
            Err(ConnectorError::Connection(_))
        ));
    }
}
