//! Lead persistence
//!
//! Exactly one lead per source record. Leads are never physically deleted;
//! STALE is the soft-retirement path. The scoring path touches only
//! predicted_likelihood, in a single atomic UPDATE.

use crate::features::LeadView;
use chrono::{DateTime, Utc};
use leadflow_common::model::{CrmSource, LeadStatus};
use leadflow_common::{Error, Result};
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

/// Lead row
#[derive(Debug, Clone)]
pub struct Lead {
    pub guid: Uuid,
    pub source_record_id: Uuid,
    pub vehicle_id: Uuid,
    pub status: LeadStatus,
    pub initial_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub converted: Option<i64>,
    pub predicted_likelihood: Option<f64>,
}

fn lead_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Lead> {
    let guid_str: String = row.get("guid");
    let source_record_str: String = row.get("source_record_id");
    let vehicle_str: String = row.get("vehicle_id");
    let status_str: String = row.get("status");

    let parse = |s: &str| {
        Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Bad guid in leads: {}", e)))
    };

    Ok(Lead {
        guid: parse(&guid_str)?,
        source_record_id: parse(&source_record_str)?,
        vehicle_id: parse(&vehicle_str)?,
        status: status_str.parse()?,
        initial_message: row.get("initial_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        closed_at: row.get("closed_at"),
        converted: row.get("converted"),
        predicted_likelihood: row.get("predicted_likelihood"),
    })
}

const LEAD_COLUMNS: &str = "guid, source_record_id, vehicle_id, status, initial_message, \
     created_at, updated_at, closed_at, converted, predicted_likelihood";

/// Find the lead bound to a source record
pub async fn find_by_source_record<'e, E>(
    executor: E,
    source_record_id: Uuid,
) -> Result<Option<Lead>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "SELECT {} FROM leads WHERE source_record_id = ?",
        LEAD_COLUMNS
    ))
    .bind(source_record_id.to_string())
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(lead_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Find a lead by its origin (source, source_lead_id) pair
pub async fn find_by_source_id<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
) -> Result<Option<Lead>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        "SELECT l.guid AS guid, l.source_record_id AS source_record_id, \
                l.vehicle_id AS vehicle_id, l.status AS status, \
                l.initial_message AS initial_message, l.created_at AS created_at, \
                l.updated_at AS updated_at, l.closed_at AS closed_at, \
                l.converted AS converted, l.predicted_likelihood AS predicted_likelihood \
         FROM leads l \
         JOIN source_records r ON r.guid = l.source_record_id \
         WHERE r.source = ? AND r.source_lead_id = ?",
    )
    .bind(source.as_str())
    .bind(source_lead_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(lead_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Insert a new lead
pub async fn insert<'e, E>(executor: E, lead: &Lead) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO leads (
            guid, source_record_id, vehicle_id, status, initial_message,
            created_at, updated_at, closed_at, converted, predicted_likelihood
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(lead.guid.to_string())
    .bind(lead.source_record_id.to_string())
    .bind(lead.vehicle_id.to_string())
    .bind(lead.status.as_str())
    .bind(&lead.initial_message)
    .bind(lead.created_at)
    .bind(lead.updated_at)
    .bind(lead.closed_at)
    .bind(lead.converted)
    .bind(lead.predicted_likelihood)
    .execute(executor)
    .await?;

    Ok(())
}

/// Persist a status transition and its side effects
pub async fn update_transition<'e, E>(executor: E, lead: &Lead) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE leads SET
            status = ?, initial_message = ?, updated_at = ?,
            closed_at = ?, converted = ?
        WHERE guid = ?
        "#,
    )
    .bind(lead.status.as_str())
    .bind(&lead.initial_message)
    .bind(lead.updated_at)
    .bind(lead.closed_at)
    .bind(lead.converted)
    .bind(lead.guid.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Persist a computed score for the lead with this origin pair
///
/// Single UPDATE; concurrent scoring calls for the same lead are
/// last-commit-wins with no partial field update. Returns false when no
/// matching lead exists.
pub async fn set_predicted_likelihood<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
    likelihood: f64,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE leads SET predicted_likelihood = ?
        WHERE source_record_id IN (
            SELECT guid FROM source_records WHERE source = ? AND source_lead_id = ?
        )
        "#,
    )
    .bind(likelihood)
    .bind(source.as_str())
    .bind(source_lead_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

fn view_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<LeadView> {
    let status_str: String = row.get("status");
    let source_str: String = row.get("source");
    Ok(LeadView {
        source: source_str.parse()?,
        source_lead_id: row.get("source_lead_id"),
        status: status_str.parse()?,
        created_at: row.get("created_at"),
        closed_at: row.get("closed_at"),
        converted: row.get("converted"),
        initial_message: row.get("initial_message"),
        lead_source_platform: row.get("lead_source_platform"),
        vehicle_make: row.get("make"),
        vehicle_price: row.get("price"),
        vehicle_mileage: row.get("mileage"),
        days_on_lot: row.get("days_on_lot"),
    })
}

const VIEW_QUERY: &str = r#"
    SELECT r.source AS source, r.source_lead_id AS source_lead_id,
           l.status AS status, l.created_at AS created_at, l.closed_at AS closed_at,
           l.converted AS converted, l.initial_message AS initial_message,
           json_extract(r.standardized_payload, '$.lead_source_platform') AS lead_source_platform,
           v.make AS make, v.price AS price, v.mileage AS mileage,
           v.days_on_lot AS days_on_lot
    FROM leads l
    JOIN source_records r ON r.guid = l.source_record_id
    JOIN vehicles v ON v.guid = l.vehicle_id
"#;

/// Load the flattened {Lead, Vehicle, SourceRecord} view for one lead
pub async fn load_view<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
) -> Result<Option<LeadView>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!(
        "{} WHERE r.source = ? AND r.source_lead_id = ?",
        VIEW_QUERY
    ))
    .bind(source.as_str())
    .bind(source_lead_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(view_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Load views for every closed lead (the training population)
pub async fn load_terminal_views<'e, E>(executor: E) -> Result<Vec<LeadView>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!(
        "{} WHERE l.status IN ('won', 'lost', 'stale')",
        VIEW_QUERY
    ))
    .fetch_all(executor)
    .await?;

    rows.iter().map(view_from_row).collect()
}

/// Count leads bound to a (source, source_lead_id) pair
pub async fn count_by_source_id<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM leads
        WHERE source_record_id IN (
            SELECT guid FROM source_records WHERE source = ? AND source_lead_id = ?
        )
        "#,
    )
    .bind(source.as_str())
    .bind(source_lead_id)
    .fetch_one(executor)
    .await?;

    Ok(count)
}
