//! Source record persistence
//!
//! One row per (source, source_lead_id). The raw payload is preserved
//! verbatim; re-ingestion of the same pair replaces both payloads and bumps
//! updated_at.

use chrono::{DateTime, Utc};
use leadflow_common::model::{CrmSource, StandardizedFields};
use leadflow_common::{Error, Result};
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

/// Source record row
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub guid: Uuid,
    pub source: CrmSource,
    pub source_lead_id: String,
    pub raw_payload: serde_json::Value,
    pub standardized: StandardizedFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SourceRecord> {
    let guid_str: String = row.get("guid");
    let source_str: String = row.get("source");
    let raw: String = row.get("raw_payload");
    let standardized: String = row.get("standardized_payload");

    Ok(SourceRecord {
        guid: Uuid::parse_str(&guid_str)
            .map_err(|e| Error::Internal(format!("Bad guid in source_records: {}", e)))?,
        source: source_str.parse()?,
        source_lead_id: row.get("source_lead_id"),
        raw_payload: serde_json::from_str(&raw)
            .map_err(|e| Error::Internal(format!("Bad raw payload JSON: {}", e)))?,
        standardized: serde_json::from_str(&standardized)
            .map_err(|e| Error::Internal(format!("Bad standardized payload JSON: {}", e)))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

/// Find a source record by its (source, source_lead_id) pair
pub async fn find_by_source_id<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
) -> Result<Option<SourceRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT guid, source, source_lead_id, raw_payload, standardized_payload,
               created_at, updated_at
        FROM source_records
        WHERE source = ? AND source_lead_id = ?
        "#,
    )
    .bind(source.as_str())
    .bind(source_lead_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(record_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Insert a new source record
pub async fn insert<'e, E>(executor: E, record: &SourceRecord) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO source_records (
            guid, source, source_lead_id, raw_payload, standardized_payload,
            created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.guid.to_string())
    .bind(record.source.as_str())
    .bind(&record.source_lead_id)
    .bind(record.raw_payload.to_string())
    .bind(
        serde_json::to_string(&record.standardized)
            .map_err(|e| Error::Internal(format!("Serialize standardized payload: {}", e)))?,
    )
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(executor)
    .await?;

    Ok(())
}

/// Replace both payloads and bump updated_at for an existing record
pub async fn update_payloads<'e, E>(
    executor: E,
    guid: Uuid,
    raw_payload: &serde_json::Value,
    standardized: &StandardizedFields,
    updated_at: DateTime<Utc>,
) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE source_records
        SET raw_payload = ?, standardized_payload = ?, updated_at = ?
        WHERE guid = ?
        "#,
    )
    .bind(raw_payload.to_string())
    .bind(
        serde_json::to_string(standardized)
            .map_err(|e| Error::Internal(format!("Serialize standardized payload: {}", e)))?,
    )
    .bind(updated_at)
    .bind(guid.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Count rows for a (source, source_lead_id) pair
pub async fn count_by_source_id<'e, E>(
    executor: E,
    source: CrmSource,
    source_lead_id: &str,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM source_records WHERE source = ? AND source_lead_id = ?",
    )
    .bind(source.as_str())
    .bind(source_lead_id)
    .fetch_one(executor)
    .await?;

    Ok(count)
}
