// SQLite FactStore - sqlx adapter with lock retry
//
// Domain values are written as JSON payloads; timestamps as fixed-width
// RFC 3339 (nanosecond, `Z`) so text ordering matches time ordering and the
// source_records UNIQUE key is stable across re-ingests.

use super::{schema, FactStore, RunCommit};
use crate::types::{
    AuditRecord, Discrepancy, EntityStatus, FetchFailure, RefetchRequest, ResolvedValue,
    ReviewItem, SourceRecord, TrustScore,
};
use crate::utils::retry_on_lock;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use cinefacts_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::Path;
use tracing::debug;
use uuid::Uuid;

pub struct SqliteFactStore {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteFactStore {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    /// Open the database file, creating it and its schema when missing
    pub async fn open(db_path: &Path, max_lock_wait_ms: u64) -> Result<Self> {
        let pool = schema::init_database_pool(db_path).await?;
        Ok(Self::new(pool, max_lock_wait_ms))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn insert_source_records(&self, records: &[SourceRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0usize;

        for record in records {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO source_records
                    (record_id, entity_id, entity_kind, field_name, source_id,
                     source_trust_tier, retrieved_at, value_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.record_id.to_string())
            .bind(&record.entity_id)
            .bind(enum_name(&record.entity_kind)?)
            .bind(&record.field_name)
            .bind(&record.source_id)
            .bind(enum_name(&record.source_trust_tier)?)
            .bind(timestamp(&record.retrieved_at))
            .bind(serde_json::to_string(&record.value)?)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn write_commit(&self, commit: &RunCommit) -> Result<()> {
        let entity_id = commit.entity_id.as_str();
        let mut tx = self.pool.begin().await?;

        // Resolved values are replaced wholesale, never patched
        sqlx::query("DELETE FROM resolved_values WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        for value in &commit.resolved_values {
            sqlx::query(
                r#"
                INSERT INTO resolved_values
                    (entity_id, field_name, confidence_score, resolution_method,
                     inputs_digest, resolved_at, payload)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(entity_id)
            .bind(&value.field_name)
            .bind(value.confidence_score)
            .bind(enum_name(&value.resolution_method)?)
            .bind(&value.inputs_digest)
            .bind(timestamp(&value.resolved_at))
            .bind(serde_json::to_string(value)?)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM discrepancies WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        for discrepancy in &commit.discrepancies {
            sqlx::query(
                r#"
                INSERT INTO discrepancies (entity_id, field, severity, status, payload)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(entity_id)
            .bind(&discrepancy.field)
            .bind(enum_name(&discrepancy.severity)?)
            .bind(enum_name(&discrepancy.status)?)
            .bind(serde_json::to_string(discrepancy)?)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM review_items WHERE entity_id = ?")
            .bind(entity_id)
            .execute(&mut *tx)
            .await?;
        for item in &commit.review_items {
            sqlx::query(
                r#"
                INSERT INTO review_items (item_id, entity_id, field, created_at, payload)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.item_id.to_string())
            .bind(entity_id)
            .bind(&item.field)
            .bind(timestamp(&item.created_at))
            .bind(serde_json::to_string(item)?)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO trust_scores (entity_id, overall_level, evaluated_at, payload)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(entity_id) DO UPDATE SET
                overall_level = excluded.overall_level,
                evaluated_at = excluded.evaluated_at,
                payload = excluded.payload
            "#,
        )
        .bind(entity_id)
        .bind(enum_name(&commit.trust_score.overall_level)?)
        .bind(timestamp(&commit.trust_score.evaluated_at))
        .bind(serde_json::to_string(&commit.trust_score)?)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO entity_status (entity_id, status, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(entity_id) DO UPDATE SET
                status = excluded.status,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(entity_id)
        .bind(enum_name(&commit.status)?)
        .execute(&mut *tx)
        .await?;

        match &commit.refetch {
            Some(request) => {
                sqlx::query(
                    r#"
                    INSERT INTO refetch_requests (entity_id, requested_at, payload)
                    VALUES (?, ?, ?)
                    ON CONFLICT(entity_id) DO UPDATE SET
                        requested_at = excluded.requested_at,
                        payload = excluded.payload
                    "#,
                )
                .bind(entity_id)
                .bind(timestamp(&request.requested_at))
                .bind(serde_json::to_string(request)?)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM refetch_requests WHERE entity_id = ?")
                    .bind(entity_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        sqlx::query(
            r#"
            INSERT INTO audit_records (entity_id, run_id, timestamp, status, payload)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(entity_id)
        .bind(commit.audit.run_id.to_string())
        .bind(timestamp(&commit.audit.timestamp))
        .bind(enum_name(&commit.audit.status)?)
        .bind(serde_json::to_string(&commit.audit)?)
        .execute(&mut *tx)
        .await?;

        for failure_id in &commit.consumed_failures {
            sqlx::query("UPDATE fetch_failures SET consumed = 1 WHERE failure_id = ?")
                .bind(failure_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn insert_fetch_failures(&self, failures: &[FetchFailure]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for failure in failures {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO fetch_failures
                    (failure_id, entity_id, source_id, field, occurred_at, payload)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(failure.failure_id.to_string())
            .bind(&failure.entity_id)
            .bind(&failure.source_id)
            .bind(failure.field.as_deref())
            .bind(timestamp(&failure.occurred_at))
            .bind(serde_json::to_string(failure)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl FactStore for SqliteFactStore {
    async fn append_source_records(&self, records: &[SourceRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let inserted = retry_on_lock("source record append", self.max_lock_wait_ms, move || {
            self.insert_source_records(records)
        })
        .await?;
        debug!(
            received = records.len(),
            inserted,
            "Appended source records"
        );
        Ok(inserted)
    }

    async fn load_source_records(&self, entity_id: &str) -> Result<Vec<SourceRecord>> {
        let rows: Vec<(String, String, String, String, String, String, String, String)> =
            sqlx::query_as(
                r#"
                SELECT record_id, entity_id, entity_kind, field_name, source_id,
                       source_trust_tier, retrieved_at, value_json
                FROM source_records
                WHERE entity_id = ?
                ORDER BY field_name, retrieved_at, source_id, record_id
                "#,
            )
            .bind(entity_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(
                |(record_id, entity_id, kind, field_name, source_id, tier, retrieved_at, value)| {
                    Ok(SourceRecord {
                        record_id: parse_uuid(&record_id)?,
                        entity_id,
                        entity_kind: parse_enum(&kind)?,
                        field_name,
                        value: serde_json::from_str(&value)?,
                        source_id,
                        retrieved_at: parse_timestamp(&retrieved_at)?,
                        source_trust_tier: parse_enum(&tier)?,
                    })
                },
            )
            .collect()
    }

    async fn list_entities(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT DISTINCT entity_id FROM source_records ORDER BY entity_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn load_resolved_values(&self, entity_id: &str) -> Result<Vec<ResolvedValue>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM resolved_values WHERE entity_id = ? ORDER BY field_name",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }

    async fn get_resolved_value(&self, entity_id: &str, field: &str) -> Result<Option<ResolvedValue>> {
        let payload: Option<String> = sqlx::query_scalar(
            "SELECT payload FROM resolved_values WHERE entity_id = ? AND field_name = ?",
        )
        .bind(entity_id)
        .bind(field)
        .fetch_optional(&self.pool)
        .await?;
        payload.map(|p| decode(&p)).transpose()
    }

    async fn load_discrepancies(&self, entity_id: &str) -> Result<Vec<Discrepancy>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM discrepancies WHERE entity_id = ? ORDER BY field",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }

    async fn commit_run(&self, commit: RunCommit) -> Result<()> {
        let pending = &commit;
        retry_on_lock("resolution run commit", self.max_lock_wait_ms, move || {
            self.write_commit(pending)
        })
        .await?;
        debug!(
            entity_id = %commit.entity_id,
            run_id = %commit.audit.run_id,
            status = %commit.status,
            "Committed resolution run"
        );
        Ok(())
    }

    async fn load_trust_score(&self, entity_id: &str) -> Result<Option<TrustScore>> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM trust_scores WHERE entity_id = ?")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?;
        payload.map(|p| decode(&p)).transpose()
    }

    async fn load_status(&self, entity_id: &str) -> Result<Option<EntityStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM entity_status WHERE entity_id = ?")
                .bind(entity_id)
                .fetch_optional(&self.pool)
                .await?;
        status.map(|s| parse_enum(&s)).transpose()
    }

    async fn load_audit_trail(&self, entity_id: &str) -> Result<Vec<AuditRecord>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM audit_records WHERE entity_id = ? ORDER BY seq",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }

    async fn review_queue(&self, limit: usize) -> Result<Vec<ReviewItem>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM review_items ORDER BY created_at, entity_id, field LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }

    async fn record_fetch_failures(&self, failures: &[FetchFailure]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        retry_on_lock("fetch failure record", self.max_lock_wait_ms, move || {
            self.insert_fetch_failures(failures)
        })
        .await
    }

    async fn pending_fetch_failures(&self, entity_id: &str) -> Result<Vec<FetchFailure>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT payload FROM fetch_failures
            WHERE entity_id = ? AND consumed = 0
            ORDER BY occurred_at, failure_id
            "#,
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }

    async fn refetch_queue(&self) -> Result<Vec<RefetchRequest>> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM refetch_requests ORDER BY requested_at, entity_id",
        )
        .fetch_all(&self.pool)
        .await?;
        decode_all(&payloads)
    }
}

// ============================================================================
// Encoding helpers
// ============================================================================

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Malformed stored timestamp '{}': {}", raw, e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|e| Error::Internal(format!("Malformed stored id '{}': {}", raw, e)))
}

/// Serde name of a unit enum variant (`re_queued`, `aggregator`, ...)
fn enum_name<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(name) => Ok(name),
        other => Err(Error::Internal(format!("Expected unit variant, got {}", other))),
    }
}

fn parse_enum<T: DeserializeOwned>(name: &str) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(name.to_string()))?)
}

fn decode<T: DeserializeOwned>(payload: &str) -> Result<T> {
    Ok(serde_json::from_str(payload)?)
}

fn decode_all<T: DeserializeOwned>(payloads: &[String]) -> Result<Vec<T>> {
    payloads.iter().map(|p| decode(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityStatus, TrustTier};

    #[test]
    fn test_timestamp_is_fixed_width() {
        let a = "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let b = "2026-01-01T00:00:00.5Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(timestamp(&a).len(), timestamp(&b).len());
        assert!(timestamp(&a) < timestamp(&b));
        assert_eq!(parse_timestamp(&timestamp(&b)).unwrap(), b);
    }

    #[test]
    fn test_enum_names_follow_serde() {
        assert_eq!(enum_name(&EntityStatus::ReQueued).unwrap(), "re_queued");
        assert_eq!(enum_name(&TrustTier::Aggregator).unwrap(), "aggregator");
        let status: EntityStatus = parse_enum("blocked").unwrap();
        assert_eq!(status, EntityStatus::Blocked);
        assert!(parse_enum::<EntityStatus>("published").is_err());
    }
}
