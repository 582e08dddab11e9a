//! Canonical domain types
//!
//! Source-agnostic representations of inbound CRM data. Every connector maps
//! its own payload shape into these types before anything touches the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External CRM systems leads can originate from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrmSource {
    VinSolutions,
    Cdk,
    Reynolds,
}

impl CrmSource {
    /// Stable string form used in the database and in config section names
    pub fn as_str(&self) -> &'static str {
        match self {
            CrmSource::VinSolutions => "VinSolutions",
            CrmSource::Cdk => "CDK",
            CrmSource::Reynolds => "Reynolds",
        }
    }

    /// All known sources, in registry order
    pub fn all() -> &'static [CrmSource] {
        &[CrmSource::VinSolutions, CrmSource::Cdk, CrmSource::Reynolds]
    }
}

impl fmt::Display for CrmSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrmSource {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vinsolutions" => Ok(CrmSource::VinSolutions),
            "cdk" => Ok(CrmSource::Cdk),
            "reynolds" => Ok(CrmSource::Reynolds),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown CRM source: {}",
                other
            ))),
        }
    }
}

/// Lead conversion lifecycle status
///
/// WON, LOST and STALE are terminal: a lead in one of them is considered
/// closed. Upstream CRMs remain the source of truth, so any status may follow
/// any status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Contacted,
    Appointment,
    Showed,
    TestDrive,
    Negotiation,
    Won,
    Lost,
    Stale,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Appointment => "appointment",
            LeadStatus::Showed => "showed",
            LeadStatus::TestDrive => "test_drive",
            LeadStatus::Negotiation => "negotiation",
            LeadStatus::Won => "won",
            LeadStatus::Lost => "lost",
            LeadStatus::Stale => "stale",
        }
    }

    /// Whether this status closes the lead
    pub fn is_terminal(&self) -> bool {
        matches!(self, LeadStatus::Won | LeadStatus::Lost | LeadStatus::Stale)
    }

    /// Conversion label for a terminal status: 1 for WON, 0 for LOST/STALE.
    /// Non-terminal statuses have no label yet.
    pub fn conversion_label(&self) -> Option<i64> {
        match self {
            LeadStatus::Won => Some(1),
            LeadStatus::Lost | LeadStatus::Stale => Some(0),
            _ => None,
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = crate::Error;

    /// Case-insensitive match against the status set. Unmapped strings are an
    /// error; the reconciler fails that record rather than guessing.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "new" | "open" => Ok(LeadStatus::New),
            "contacted" => Ok(LeadStatus::Contacted),
            "appointment" => Ok(LeadStatus::Appointment),
            "showed" => Ok(LeadStatus::Showed),
            "test_drive" => Ok(LeadStatus::TestDrive),
            "negotiation" => Ok(LeadStatus::Negotiation),
            "won" => Ok(LeadStatus::Won),
            "lost" => Ok(LeadStatus::Lost),
            "stale" => Ok(LeadStatus::Stale),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown lead status: {}",
                other
            ))),
        }
    }
}

/// Canonical fields extracted from a source payload by a standardizer
///
/// Missing fields are explicit `None`, never silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardizedFields {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Raw status string as the CRM reported it
    pub status_raw: Option<String>,
    pub initial_message: Option<String>,
    /// Source-native vehicle identifier the lead refers to
    pub vehicle_ref_id: Option<String>,
    /// Vehicle make/model as carried inline on the lead payload, if any.
    /// Used only to seed placeholder vehicles; detail fetches are the real
    /// source of vehicle data.
    pub vehicle_make: Option<String>,
    pub vehicle_model: Option<String>,
    pub customer_ref_id: Option<String>,
    /// Platform the lead arrived through (e.g. "Facebook Marketplace")
    pub lead_source_platform: Option<String>,
}

/// One standardized inbound record, ready for reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardizedRecord {
    pub source: CrmSource,
    pub source_lead_id: String,
    /// Original payload, preserved verbatim
    pub raw_payload: serde_json::Value,
    pub standardized: StandardizedFields,
}

/// Vehicle enrichment payload from a detail fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleDetails {
    pub source_vehicle_id: String,
    pub vin: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i64>,
    pub price: Option<f64>,
    pub mileage: Option<f64>,
    pub days_on_lot: Option<i64>,
}

/// Single-lead enrichment payload from a detail fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadDetails {
    pub source_lead_id: String,
    pub assigned_salesperson_id: Option<String>,
    pub extra: serde_json::Value,
}
