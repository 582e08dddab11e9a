//! Vehicle persistence
//!
//! Vehicles are looked up by their source-native vehicle id and never
//! deleted. A lead referencing an unknown vehicle id creates a placeholder
//! row that a later detail fetch enriches.

use leadflow_common::model::VehicleDetails;
use leadflow_common::{Error, Result};
use sqlx::{Executor, Row, Sqlite};
use uuid::Uuid;

/// Vehicle row
#[derive(Debug, Clone)]
pub struct Vehicle {
    pub guid: Uuid,
    pub source_vehicle_id: String,
    pub vin: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i64>,
    pub price: Option<f64>,
    pub mileage: Option<f64>,
    pub days_on_lot: Option<i64>,
}

impl Vehicle {
    /// Placeholder vehicle carrying only what the lead payload knew about it
    pub fn placeholder(source_vehicle_id: String, make: Option<String>, model: Option<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            source_vehicle_id,
            vin: None,
            make,
            model,
            year: None,
            price: None,
            mileage: None,
            days_on_lot: None,
        }
    }
}

fn vehicle_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Vehicle> {
    let guid_str: String = row.get("guid");
    Ok(Vehicle {
        guid: Uuid::parse_str(&guid_str)
            .map_err(|e| Error::Internal(format!("Bad guid in vehicles: {}", e)))?,
        source_vehicle_id: row.get("source_vehicle_id"),
        vin: row.get("vin"),
        make: row.get("make"),
        model: row.get("model"),
        year: row.get("year"),
        price: row.get("price"),
        mileage: row.get("mileage"),
        days_on_lot: row.get("days_on_lot"),
    })
}

/// Find a vehicle by its source-native id
pub async fn find_by_source_vehicle_id<'e, E>(
    executor: E,
    source_vehicle_id: &str,
) -> Result<Option<Vehicle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT guid, source_vehicle_id, vin, make, model, year, price, mileage, days_on_lot
        FROM vehicles
        WHERE source_vehicle_id = ?
        "#,
    )
    .bind(source_vehicle_id)
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(vehicle_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Find a vehicle by its internal guid
pub async fn find_by_guid<'e, E>(executor: E, guid: Uuid) -> Result<Option<Vehicle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(
        r#"
        SELECT guid, source_vehicle_id, vin, make, model, year, price, mileage, days_on_lot
        FROM vehicles
        WHERE guid = ?
        "#,
    )
    .bind(guid.to_string())
    .fetch_optional(executor)
    .await?;

    match row {
        Some(row) => Ok(Some(vehicle_from_row(&row)?)),
        None => Ok(None),
    }
}

/// Insert a vehicle row
pub async fn insert<'e, E>(executor: E, vehicle: &Vehicle) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO vehicles (
            guid, source_vehicle_id, vin, make, model, year, price, mileage, days_on_lot
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(vehicle.guid.to_string())
    .bind(&vehicle.source_vehicle_id)
    .bind(&vehicle.vin)
    .bind(&vehicle.make)
    .bind(&vehicle.model)
    .bind(vehicle.year)
    .bind(vehicle.price)
    .bind(vehicle.mileage)
    .bind(vehicle.days_on_lot)
    .execute(executor)
    .await?;

    Ok(())
}

/// Enrich an existing vehicle row from a detail-fetch payload
///
/// Only fields present in the details are overwritten.
pub async fn enrich<'e, E>(executor: E, guid: Uuid, details: &VehicleDetails) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        UPDATE vehicles SET
            vin = COALESCE(?, vin),
            make = COALESCE(?, make),
            model = COALESCE(?, model),
            year = COALESCE(?, year),
            price = COALESCE(?, price),
            mileage = COALESCE(?, mileage),
            days_on_lot = COALESCE(?, days_on_lot)
        WHERE guid = ?
        "#,
    )
    .bind(&details.vin)
    .bind(&details.make)
    .bind(&details.model)
    .bind(details.year)
    .bind(details.price)
    .bind(details.mileage)
    .bind(details.days_on_lot)
    .bind(guid.to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Placeholder vehicles still waiting for a detail fetch
///
/// A vehicle without a price has only ever been seen inline on a lead
/// payload.
pub async fn find_unenriched<'e, E>(executor: E) -> Result<Vec<Vehicle>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT guid, source_vehicle_id, vin, make, model, year, price, mileage, days_on_lot
        FROM vehicles
        WHERE price IS NULL
        "#,
    )
    .fetch_all(executor)
    .await?;

    rows.iter().map(vehicle_from_row).collect()
}

/// Total vehicle row count
pub async fn count<'e, E>(executor: E) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vehicles")
        .fetch_one(executor)
        .await?;
    Ok(count)
}
