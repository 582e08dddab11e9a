//! Feature pipeline
//!
//! One function derives the feature vector from the flattened lead view and
//! an explicit `as_of` instant. Training extraction and live scoring both go
//! through it, so derived values are bit-identical between the two call
//! sites. "Now" is never read here.
//!
//! Documented defaults (the only silent imputation allowed):
//! - missing `initial_message` → length 0
//! - missing `lead_source_platform` → "unknown"
//!
//! Every other missing required column fails the record with the column name.

use chrono::{DateTime, Utc};
use leadflow_common::model::{CrmSource, LeadStatus};
use thiserror::Error;

/// Numeric feature columns, in model input order
pub const NUMERIC_FEATURES: &[&str] = &[
    "vehicle_price",
    "vehicle_mileage",
    "days_on_lot",
    "lead_age_hours",
    "initial_message_len",
];

/// Categorical feature columns, in model input order
pub const CATEGORICAL_FEATURES: &[&str] =
    &["vehicle_make", "lead_source_platform", "crm_source"];

/// Feature derivation error
#[derive(Debug, Error)]
pub enum FeatureError {
    /// A required raw column was absent after the view was assembled
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
}

/// Flattened view of {Lead, Vehicle, SourceRecord} raw columns
///
/// Option-typed so that absence is visible to the pipeline instead of being
/// papered over upstream.
#[derive(Debug, Clone)]
pub struct LeadView {
    pub source: CrmSource,
    pub source_lead_id: String,
    pub status: LeadStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub converted: Option<i64>,
    pub initial_message: Option<String>,
    pub lead_source_platform: Option<String>,
    pub vehicle_make: Option<String>,
    pub vehicle_price: Option<f64>,
    pub vehicle_mileage: Option<f64>,
    pub days_on_lot: Option<i64>,
}

/// Derived feature vector, the scorer's entire input
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub vehicle_price: f64,
    pub vehicle_mileage: f64,
    pub days_on_lot: f64,
    pub lead_age_hours: f64,
    pub initial_message_len: f64,
    pub vehicle_make: String,
    pub lead_source_platform: String,
    pub crm_source: String,
}

impl FeatureVector {
    /// Numeric values in `NUMERIC_FEATURES` order
    pub fn numeric(&self) -> [f64; 5] {
        [
            self.vehicle_price,
            self.vehicle_mileage,
            self.days_on_lot,
            self.lead_age_hours,
            self.initial_message_len,
        ]
    }

    /// Categorical values in `CATEGORICAL_FEATURES` order
    pub fn categorical(&self) -> [&str; 3] {
        [
            &self.vehicle_make,
            &self.lead_source_platform,
            &self.crm_source,
        ]
    }
}

/// Derive the feature vector for a lead view at an explicit instant
///
/// Lead age: a closed lead ages until `closed_at` and no further; an open
/// lead ages until `as_of`. For live scoring `as_of` is the request's
/// reception time, for training extraction it is the snapshot time.
pub fn features(view: &LeadView, as_of: DateTime<Utc>) -> Result<FeatureVector, FeatureError> {
    let vehicle_price = view
        .vehicle_price
        .ok_or(FeatureError::MissingColumn("vehicle_price"))?;
    let vehicle_mileage = view
        .vehicle_mileage
        .ok_or(FeatureError::MissingColumn("vehicle_mileage"))?;
    let days_on_lot = view
        .days_on_lot
        .ok_or(FeatureError::MissingColumn("days_on_lot"))? as f64;
    let vehicle_make = view
        .vehicle_make
        .clone()
        .ok_or(FeatureError::MissingColumn("vehicle_make"))?;

    let age_end = if view.status.is_terminal() {
        view.closed_at
            .ok_or(FeatureError::MissingColumn("closed_at"))?
    } else {
        as_of
    };
    let lead_age_hours = (age_end - view.created_at).num_seconds() as f64 / 3600.0;

    let initial_message_len = view
        .initial_message
        .as_ref()
        .map(|m| m.chars().count() as f64)
        .unwrap_or(0.0);

    let lead_source_platform = view
        .lead_source_platform
        .clone()
        .unwrap_or_else(|| "unknown".to_string());

    Ok(FeatureVector {
        vehicle_price,
        vehicle_mileage,
        days_on_lot,
        lead_age_hours,
        initial_message_len,
        vehicle_make,
        lead_source_platform,
        crm_source: view.source.as_str().to_string(),
    })
}
