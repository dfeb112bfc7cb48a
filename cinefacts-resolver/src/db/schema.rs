//! SQLite schema and pool initialisation
//!
//! Every table is created with `CREATE TABLE IF NOT EXISTS`, so opening an
//! existing database is idempotent. Domain values are stored as JSON payload
//! columns next to the handful of columns the queries filter on.

use cinefacts_common::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version, recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// SQLite busy timeout; lock waits beyond this surface to `retry_on_lock`
const BUSY_TIMEOUT_MS: u64 = 250;

/// Open (creating if needed) the database and ensure the schema exists
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
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

/// Create all tables and indexes (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_source_records_table(pool).await?;
    create_resolved_values_table(pool).await?;
    create_discrepancies_table(pool).await?;
    create_review_items_table(pool).await?;
    create_trust_scores_table(pool).await?;
    create_entity_status_table(pool).await?;
    create_audit_records_table(pool).await?;
    create_fetch_failures_table(pool).await?;
    create_refetch_requests_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_source_records_table(pool: &SqlitePool) -> Result<()> {
    // Append-only; the UNIQUE key makes exact re-ingests a no-op
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_records (
            record_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            entity_kind TEXT NOT NULL,
            field_name TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_trust_tier TEXT NOT NULL,
            retrieved_at TEXT NOT NULL,
            value_json TEXT NOT NULL,
            ingested_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (entity_id, field_name, source_id, retrieved_at, value_json)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_records_entity ON source_records(entity_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_resolved_values_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resolved_values (
            entity_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            resolution_method TEXT NOT NULL,
            inputs_digest TEXT NOT NULL,
            resolved_at TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (entity_id, field_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_discrepancies_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS discrepancies (
            entity_id TEXT NOT NULL,
            field TEXT NOT NULL,
            severity TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL,
            PRIMARY KEY (entity_id, field)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_review_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS review_items (
            item_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            field TEXT NOT NULL,
            created_at TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_review_items_created ON review_items(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_trust_scores_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trust_scores (
            entity_id TEXT PRIMARY KEY,
            overall_level TEXT NOT NULL,
            evaluated_at TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_entity_status_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entity_status (
            entity_id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_audit_records_table(pool: &SqlitePool) -> Result<()> {
    // Append-only: rows are never updated or deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_records (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            status TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_records_entity ON audit_records(entity_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_fetch_failures_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fetch_failures (
            failure_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            field TEXT,
            occurred_at TEXT NOT NULL,
            consumed INTEGER NOT NULL DEFAULT 0,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_refetch_requests_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS refetch_requests (
            entity_id TEXT PRIMARY KEY,
            requested_at TEXT NOT NULL,
            payload TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
