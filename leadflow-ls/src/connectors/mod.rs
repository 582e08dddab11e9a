//! CRM connectors
//!
//! One concrete connector per external CRM, all implementing the
//! `CrmConnector` capability trait. Each connector owns its credentials and
//! HTTP session; there is no shared state between variants. Selection happens
//! through a lookup table built once at startup.

pub mod cdk;
pub mod reynolds;
pub mod vinsolutions;

pub use cdk::CdkConnector;
pub use reynolds::ReynoldsConnector;
pub use vinsolutions::VinSolutionsConnector;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadflow_common::config::Config;
use leadflow_common::model::{CrmSource, LeadDetails, StandardizedRecord, VehicleDetails};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Source unreachable or misconfigured; skip this source for the run
    #[error("Connection error: {0}")]
    Connection(String),

    /// One fetch call failed; abort this source's current run
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Score dispatch to the origin CRM failed
    #[error("Writeback error: {0}")]
    Writeback(String),
}

/// Capability set every CRM source implements
#[async_trait]
pub trait CrmConnector: Send + Sync {
    /// The source this connector serves
    fn source(&self) -> CrmSource;

    /// Establish a session. Idempotent; calling twice is a no-op.
    async fn connect(&self) -> Result<(), ConnectorError>;

    /// Release the session. Safe to call when not connected.
    async fn disconnect(&self);

    /// Fetch records created or updated at or after `since`, standardized.
    /// No new records is an empty sequence, not an error.
    async fn fetch_new_records(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<StandardizedRecord>, ConnectorError>;

    /// Single-lead enrichment fetch
    async fn fetch_record_details(
        &self,
        source_lead_id: &str,
    ) -> Result<LeadDetails, ConnectorError>;

    /// Single-vehicle enrichment fetch
    async fn fetch_vehicle_details(
        &self,
        source_vehicle_id: &str,
    ) -> Result<VehicleDetails, ConnectorError>;

    /// Push a computed score back to the origin CRM
    async fn update_lead_score(
        &self,
        source_lead_id: &str,
        score: f64,
    ) -> Result<(), ConnectorError>;
}

/// Registry of configured connectors, keyed by source
pub type ConnectorRegistry = HashMap<CrmSource, Arc<dyn CrmConnector>>;

/// Build the connector lookup table from configuration
///
/// Sources without a config section are left out; ingestion and writeback
/// for them become no-ops.
pub fn build_connectors(config: &Config) -> ConnectorRegistry {
    let mut registry: ConnectorRegistry = HashMap::new();

    for &source in CrmSource::all() {
        let Some(connector_config) = config.connector(source) else {
            tracing::debug!(source = %source, "No connector configured");
            continue;
        };

        let connector: Arc<dyn CrmConnector> = match source {
            CrmSource::VinSolutions => {
                Arc::new(VinSolutionsConnector::new(connector_config.clone()))
            }
            CrmSource::Cdk => Arc::new(CdkConnector::new(connector_config.clone())),
            CrmSource::Reynolds => Arc::new(ReynoldsConnector::new(connector_config.clone())),
        };
        registry.insert(source, connector);
    }

    tracing::info!(count = registry.len(), "Connector registry built");
    registry
}

/// Pull a string out of a JSON payload field, stringifying bare numbers
///
/// CRMs disagree on whether ids are strings or numbers; canonically they are
/// strings.
pub(crate) fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse an RFC 3339 timestamp field; anything unparseable is an explicit None
pub(crate) fn json_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
