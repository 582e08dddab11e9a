//! Reconciliation
//!
//! Merges standardized records into the canonical entities. Each record is
//! one transaction: source-record upsert, vehicle resolution, lead
//! create-or-update with the status transition side effects. A failing
//! record rolls back alone; the batch keeps going.
//!
//! Together with the store's uniqueness constraints this makes ingestion
//! idempotent: re-ingesting an unchanged record only refreshes timestamps,
//! and two concurrent runs converge on one lead per (source, source_lead_id).

use crate::db::{leads, source_records, vehicles, Lead, SourceRecord, Vehicle};
use chrono::{DateTime, Utc};
use leadflow_common::model::{LeadStatus, StandardizedRecord};
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Single-record reconciliation failure
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A field the reconciler cannot proceed without was absent
    #[error("Record missing required field: {0}")]
    MissingField(&'static str),

    /// The CRM status string did not map to the status set
    #[error("Unmapped status string: {0}")]
    UnknownStatus(String),

    /// Database error, including constraint violations
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store-layer error
    #[error(transparent)]
    Store(#[from] leadflow_common::Error),
}

impl ReconcileError {
    /// True for failures a later retry of the same payload could clear.
    ///
    /// Validation failures are permanent for a given payload; re-fetching
    /// it yields the same rejection. Store errors are retryable.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Store(_))
    }
}

/// What reconciling one record did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Updated,
}

/// Batch result: contained per-record failures, never a batch abort
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<(String, ReconcileError)>,
}

impl BatchOutcome {
    pub fn processed(&self) -> usize {
        self.created + self.updated
    }

    /// How many failures were store errors rather than bad payloads
    pub fn transient_failures(&self) -> usize {
        self.failures.iter().filter(|(_, e)| e.is_transient()).count()
    }
}

/// Reconciler over the canonical entity store
pub struct Reconciler {
    pool: SqlitePool,
}

impl Reconciler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Reconcile a batch of standardized records
    ///
    /// Record k failing never aborts records k+1..N.
    pub async fn reconcile_batch(&self, records: &[StandardizedRecord]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for record in records {
            match self.reconcile_record(record).await {
                Ok(RecordOutcome::Created) => outcome.created += 1,
                Ok(RecordOutcome::Updated) => outcome.updated += 1,
                Err(e) => {
                    warn!(
                        source = %record.source,
                        source_lead_id = %record.source_lead_id,
                        error = %e,
                        "Record failed reconciliation, continuing batch"
                    );
                    outcome.failures.push((record.source_lead_id.clone(), e));
                }
            }
        }

        info!(
            created = outcome.created,
            updated = outcome.updated,
            failed = outcome.failures.len(),
            "Batch reconciled"
        );
        outcome
    }

    /// Reconcile one record in one atomic unit of work
    pub async fn reconcile_record(
        &self,
        record: &StandardizedRecord,
    ) -> Result<RecordOutcome, ReconcileError> {
        // Validate before touching the store: the status string must map and
        // the vehicle reference must exist
        let status_raw = record
            .standardized
            .status_raw
            .as_deref()
            .ok_or(ReconcileError::MissingField("status"))?;
        let status: LeadStatus = status_raw
            .parse()
            .map_err(|_| ReconcileError::UnknownStatus(status_raw.to_string()))?;

        let vehicle_ref_id = record
            .standardized
            .vehicle_ref_id
            .as_deref()
            .ok_or(ReconcileError::MissingField("vehicle_ref_id"))?;

        let now = Utc::now();
        let record_updated_at = record.standardized.updated_at.unwrap_or(now);

        // Every unit of work here writes, so take the write lock up front.
        // A deferred transaction that reads first and upgrades later fails
        // with SQLITE_BUSY the moment another worker has written, instead of
        // waiting out the connection's busy_timeout.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let result =
            apply_record(&mut conn, record, status, vehicle_ref_id, record_updated_at, now).await;

        match result {
            Ok(outcome) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(outcome)
            }
            Err(e) => {
                // Best effort; dropping the connection would roll back too
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }
}

/// The per-record unit of work, run inside an already-open transaction
async fn apply_record(
    conn: &mut SqliteConnection,
    record: &StandardizedRecord,
    status: LeadStatus,
    vehicle_ref_id: &str,
    record_updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<RecordOutcome, ReconcileError> {
    // 1. Source record: create, or replace payloads and bump updated_at
    let (source_record_id, existed) =
        match source_records::find_by_source_id(&mut *conn, record.source, &record.source_lead_id)
            .await?
        {
            Some(existing) => {
                source_records::update_payloads(
                    &mut *conn,
                    existing.guid,
                    &record.raw_payload,
                    &record.standardized,
                    record_updated_at,
                )
                .await?;
                (existing.guid, true)
            }
            None => {
                let new_record = SourceRecord {
                    guid: Uuid::new_v4(),
                    source: record.source,
                    source_lead_id: record.source_lead_id.clone(),
                    raw_payload: record.raw_payload.clone(),
                    standardized: record.standardized.clone(),
                    created_at: record.standardized.created_at.unwrap_or(now),
                    updated_at: record_updated_at,
                };
                source_records::insert(&mut *conn, &new_record).await?;
                (new_record.guid, false)
            }
        };

    // 2. Vehicle: resolve by source-native id, or create a placeholder
    //    carrying only what the payload knew (enriched later by a detail
    //    fetch)
    let vehicle = match vehicles::find_by_source_vehicle_id(&mut *conn, vehicle_ref_id).await? {
        Some(vehicle) => vehicle,
        None => {
            let placeholder = Vehicle::placeholder(
                vehicle_ref_id.to_string(),
                record.standardized.vehicle_make.clone(),
                record.standardized.vehicle_model.clone(),
            );
            vehicles::insert(&mut *conn, &placeholder).await?;
            debug!(
                source_vehicle_id = vehicle_ref_id,
                "Created placeholder vehicle"
            );
            placeholder
        }
    };

    // 3/4. Lead: create bound to the vehicle, or apply the transition rule
    let outcome = match leads::find_by_source_record(&mut *conn, source_record_id).await? {
        Some(mut lead) => {
            apply_transition(&mut lead, status, record_updated_at);
            if let Some(message) = &record.standardized.initial_message {
                lead.initial_message = Some(message.clone());
            }
            lead.updated_at = record_updated_at;
            leads::update_transition(&mut *conn, &lead).await?;
            RecordOutcome::Updated
        }
        None => {
            let mut lead = Lead {
                guid: Uuid::new_v4(),
                source_record_id,
                vehicle_id: vehicle.guid,
                status,
                initial_message: record.standardized.initial_message.clone(),
                created_at: record.standardized.created_at.unwrap_or(now),
                updated_at: record_updated_at,
                closed_at: None,
                converted: None,
                predicted_likelihood: None,
            };
            // A lead born in a terminal status is closed at creation
            if status.is_terminal() {
                lead.closed_at = Some(record_updated_at);
                lead.converted = status.conversion_label();
            }
            leads::insert(&mut *conn, &lead).await?;
            if existed {
                RecordOutcome::Updated
            } else {
                RecordOutcome::Created
            }
        }
    };

    Ok(outcome)
}

/// Apply the status transition rule
///
/// The new status overwrites the old unconditionally; upstream CRMs are the
/// source of truth. Side effects:
/// - first entry into the terminal set: closed_at set to the transition
///   timestamp, converted mapped (1 for WON, 0 for LOST/STALE)
/// - exit from the terminal set: closed_at cleared, converted reset to
///   unknown (the re-open case)
/// - staying terminal: closed_at untouched, converted re-mapped to the new
///   terminal status
fn apply_transition(
    lead: &mut Lead,
    new_status: LeadStatus,
    at: chrono::DateTime<chrono::Utc>,
) {
    lead.status = new_status;
    if new_status.is_terminal() {
        if lead.closed_at.is_none() {
            lead.closed_at = Some(at);
        }
        lead.converted = new_status.conversion_label();
    } else {
        lead.closed_at = None;
        lead.converted = None;
    }
}
