//! Database initialization and schema creation

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Connect-time options apply to every connection the pool opens, not
    // just the first one handed out. WAL allows concurrent readers with one
    // writer; ingestion workers and scoring requests share this pool.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create the canonical entity tables (idempotent)
async fn create_schema(pool: &SqlitePool) -> Result<()> {
    // One row per (source, source_lead_id); re-ingestion replaces the payloads
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_records (
            guid TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_lead_id TEXT NOT NULL,
            raw_payload TEXT NOT NULL,
            standardized_payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(source, source_lead_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // source_vehicle_id is the cross-source lookup key; vehicles are never
    // deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vehicles (
            guid TEXT PRIMARY KEY,
            source_vehicle_id TEXT NOT NULL UNIQUE,
            vin TEXT UNIQUE,
            make TEXT,
            model TEXT,
            year INTEGER,
            price REAL,
            mileage REAL,
            days_on_lot INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Exactly one lead per source record (unique FK)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            guid TEXT PRIMARY KEY,
            source_record_id TEXT NOT NULL UNIQUE
                REFERENCES source_records(guid),
            vehicle_id TEXT NOT NULL
                REFERENCES vehicles(guid),
            status TEXT NOT NULL,
            initial_message TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            closed_at TEXT,
            converted INTEGER,
            predicted_likelihood REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-source last successful fetch instant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_watermarks (
            source TEXT PRIMARY KEY,
            last_fetch_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database schema ready (source_records, vehicles, leads, ingest_watermarks)");

    Ok(())
}
