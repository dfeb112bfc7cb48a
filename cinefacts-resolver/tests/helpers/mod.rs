//! Test Helper Utilities
//!
//! Shared fixtures for cinefacts-resolver integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use cinefacts_resolver::config::ResolutionPolicy;
use cinefacts_resolver::db::{FactStore, InMemoryFactStore, SqliteFactStore};
use cinefacts_resolver::sources::{IncomingRecord, IngestBatch};
use cinefacts_resolver::types::FieldValue;
use cinefacts_resolver::workflow::ResolutionPipeline;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixed reference instant so decay arithmetic is reproducible
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

pub fn day(n: i64) -> DateTime<Utc> {
    epoch() + Duration::days(n)
}

pub fn builtin_policy() -> ResolutionPolicy {
    ResolutionPolicy::builtin().expect("built-in policy must load")
}

/// One generic fetcher record for a movie
pub fn claim(
    entity_id: &str,
    field: &str,
    source: &str,
    value: FieldValue,
    retrieved_at: DateTime<Utc>,
) -> IncomingRecord {
    IncomingRecord {
        entity_id: entity_id.to_string(),
        entity_kind: Some("movie".to_string()),
        field: field.to_string(),
        value,
        source_name: source.to_string(),
        retrieved_at: Some(retrieved_at.to_rfc3339()),
    }
}

/// Three independent aggregators agreeing on one value
pub fn agreeing_claims(
    entity_id: &str,
    field: &str,
    value: FieldValue,
    retrieved_at: DateTime<Utc>,
) -> Vec<IncomingRecord> {
    ["tmdb", "imdb", "omdb"]
        .into_iter()
        .map(|source| claim(entity_id, field, source, value.clone(), retrieved_at))
        .collect()
}

/// A movie whose required fields are independently confirmed
pub fn complete_movie(entity_id: &str, title: &str, year: i64, retrieved_at: DateTime<Utc>) -> Vec<IncomingRecord> {
    let mut records = agreeing_claims(entity_id, "title", FieldValue::Text(title.to_string()), retrieved_at);
    records.extend(agreeing_claims(entity_id, "release_year", FieldValue::Integer(year), retrieved_at));
    records
}

pub fn batch(records: Vec<IncomingRecord>) -> IngestBatch {
    IngestBatch {
        records,
        ..Default::default()
    }
}

/// Pipeline over an in-memory store; the store handle is returned for assertions
pub fn memory_pipeline(policy: ResolutionPolicy) -> (Arc<InMemoryFactStore>, ResolutionPipeline) {
    let store = Arc::new(InMemoryFactStore::new());
    let shared: Arc<dyn FactStore> = store.clone();
    (store, ResolutionPipeline::new(shared, Arc::new(policy)))
}

/// SQLite store in a temporary directory
///
/// Returns (TempDir, store) - TempDir must be kept alive for duration of test
pub async fn sqlite_store() -> (TempDir, Arc<SqliteFactStore>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("cinefacts.db");
    let store = SqliteFactStore::open(&db_path, 2000)
        .await
        .expect("Failed to open test database");
    (temp_dir, Arc::new(store))
}

pub async fn sqlite_pipeline(policy: ResolutionPolicy) -> (TempDir, Arc<SqliteFactStore>, ResolutionPipeline) {
    let (dir, store) = sqlite_store().await;
    let shared: Arc<dyn FactStore> = store.clone();
    (dir, store, ResolutionPipeline::new(shared, Arc::new(policy)))
}
