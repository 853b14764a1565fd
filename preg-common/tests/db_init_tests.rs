//! Tests for database initialization
//!
//! - Database file is created on first run
//! - Re-opening an existing database is safe
//! - Every registry table exists afterwards

use preg_common::db::init::{init_database, SCHEMA_VERSION};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("preg.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("preg.db");

    let pool1 = init_database(&db_path).await;
    assert!(pool1.is_ok());

    // Second open runs the same CREATE IF NOT EXISTS path
    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("preg.db")).await.unwrap();

    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
    for expected in ["outbox", "registered_people", "schema_version", "settings", "users"] {
        assert!(names.contains(&expected), "missing table {expected}: {names:?}");
    }

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(version, SCHEMA_VERSION);
}

#[tokio::test]
async fn test_outbox_status_constraint() {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("preg.db")).await.unwrap();

    let result = sqlx::query(
        "INSERT INTO outbox (id, payload, status, next_attempt_at) VALUES ('x', '{}', 'done', 0)",
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "unknown outbox status should be rejected");
}
