//! Per-source ingestion watermarks
//!
//! The watermark records the instant of the last successful fetch for a
//! source. It only advances after a fetch plus reconciliation completed, so
//! a failed run replays from the last-known-good instant.

use chrono::{DateTime, Utc};
use leadflow_common::model::CrmSource;
use leadflow_common::Result;
use sqlx::{Executor, Sqlite};

/// Last successful fetch instant for a source, if any
pub async fn get<'e, E>(executor: E, source: CrmSource) -> Result<Option<DateTime<Utc>>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let value: Option<DateTime<Utc>> =
        sqlx::query_scalar("SELECT last_fetch_at FROM ingest_watermarks WHERE source = ?")
            .bind(source.as_str())
            .fetch_optional(executor)
            .await?;

    Ok(value)
}

/// Advance the watermark for a source
pub async fn set<'e, E>(executor: E, source: CrmSource, at: DateTime<Utc>) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO ingest_watermarks (source, last_fetch_at) VALUES (?, ?)
        ON CONFLICT(source) DO UPDATE SET last_fetch_at = excluded.last_fetch_at
        "#,
    )
    .bind(source.as_str())
    .bind(at)
    .execute(executor)
    .await?;

    Ok(())
}
