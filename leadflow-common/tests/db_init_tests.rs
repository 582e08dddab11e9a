//! Tests for database initialization and schema creation

use leadflow_common::db::init_database;
use std::path::PathBuf;

#[tokio::test]
async fn database_is_created_when_missing() {
    let test_db = format!("/tmp/leadflow-test-db-{}.db", std::process::id());
    let db_path = PathBuf::from(&test_db);
    let _ = std::fs::remove_file(&db_path);

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database init failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");

    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn database_opens_existing() {
    let test_db = format!("/tmp/leadflow-test-db-existing-{}.db", std::process::id());
    let db_path = PathBuf::from(&test_db);
    let _ = std::fs::remove_file(&db_path);

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());

    // Second open is idempotent
    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to reopen: {:?}", pool2.err());

    drop(pool1);
    drop(pool2);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn foreign_keys_are_enforced_on_every_connection() {
    let test_db = format!("/tmp/leadflow-test-db-fk-{}.db", std::process::id());
    let db_path = PathBuf::from(&test_db);
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    // Hold one connection so the insert below runs on a freshly opened one;
    // foreign_keys is a per-connection pragma and must be set at connect time
    let held = pool.acquire().await.unwrap();

    let dangling = sqlx::query(
        "INSERT INTO leads (guid, source_record_id, vehicle_id, status, created_at, updated_at)
         VALUES ('l1', 'no-such-record', 'no-such-vehicle', 'new',
                 '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(dangling.is_err(), "Dangling lead references were accepted");

    drop(held);
    drop(pool);
    let _ = std::fs::remove_file(&db_path);
}

#[tokio::test]
async fn uniqueness_constraints_are_enforced() {
    let test_db = format!("/tmp/leadflow-test-db-unique-{}.db", std::process::id());
    let db_path = PathBuf::from(&test_db);
    let _ = std::fs::remove_file(&db_path);

    let pool = init_database(&db_path).await.unwrap();

    sqlx::query(
        "INSERT INTO source_records (guid, source, source_lead_id, raw_payload, standardized_payload, created_at, updated_at)
         VALUES ('a', 'VinSolutions', 'L1', '{}', '{}', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await
    .unwrap();

    // Same (source, source_lead_id) pair must be rejected
    let dup = sqlx::query(
        "INSERT INTO source_records (guid, source, source_lead_id, raw_payload, standardized_payload, created_at, updated_at)
         VALUES ('b', 'VinSolutions', 'L1', '{}', '{}', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
    )
    .execute(&pool)
    .await;
    assert!(dup.is_err(), "Duplicate (source, source_lead_id) was accepted");

    drop(pool);
    let _ = std::fs::remove_file(&db_path);
}
