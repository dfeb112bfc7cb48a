//! In-memory FactStore
//!
//! Backs the test suite and `--ephemeral` runs. Same observable behaviour as
//! the SQLite adapter: idempotent appends, wholesale replacement on commit,
//! append-only audit trail.

use super::{FactStore, RunCommit};
use crate::types::{
    AuditRecord, Discrepancy, EntityStatus, FetchFailure, RefetchRequest, ResolvedValue,
    ReviewItem, SourceRecord, TrustScore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cinefacts_common::Result;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Exact-duplicate key for source records
type RecordKey = (String, String, String, DateTime<Utc>, String);

#[derive(Default)]
struct Tables {
    source_records: Vec<SourceRecord>,
    record_keys: HashSet<RecordKey>,
    resolved_values: BTreeMap<String, BTreeMap<String, ResolvedValue>>,
    discrepancies: BTreeMap<String, Vec<Discrepancy>>,
    review_items: BTreeMap<String, Vec<ReviewItem>>,
    trust_scores: BTreeMap<String, TrustScore>,
    statuses: BTreeMap<String, EntityStatus>,
    audit: Vec<AuditRecord>,
    fetch_failures: Vec<(FetchFailure, bool)>,
    refetch: BTreeMap<String, RefetchRequest>,
}

#[derive(Default)]
pub struct InMemoryFactStore {
    tables: RwLock<Tables>,
}

impl InMemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn record_key(record: &SourceRecord) -> Result<RecordKey> {
    Ok((
        record.entity_id.clone(),
        record.field_name.clone(),
        record.source_id.clone(),
        record.retrieved_at,
        serde_json::to_string(&record.value)?,
    ))
}

#[async_trait]
impl FactStore for InMemoryFactStore {
    async fn append_source_records(&self, records: &[SourceRecord]) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut inserted = 0;
        for record in records {
            if tables.record_keys.insert(record_key(record)?) {
                tables.source_records.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_source_records(&self, entity_id: &str) -> Result<Vec<SourceRecord>> {
        let tables = self.tables.read().await;
        let mut records: Vec<SourceRecord> = tables
            .source_records
            .iter()
            .filter(|r| r.entity_id == entity_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            (&a.field_name, a.retrieved_at, &a.source_id, a.record_id).cmp(&(
                &b.field_name,
                b.retrieved_at,
                &b.source_id,
                b.record_id,
            ))
        });
        Ok(records)
    }

    async fn list_entities(&self) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        let mut ids: Vec<String> = tables
            .source_records
            .iter()
            .map(|r| r.entity_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn load_resolved_values(&self, entity_id: &str) -> Result<Vec<ResolvedValue>> {
        let tables = self.tables.read().await;
        Ok(tables
            .resolved_values
            .get(entity_id)
            .map(|fields| fields.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_resolved_value(&self, entity_id: &str, field: &str) -> Result<Option<ResolvedValue>> {
        let tables = self.tables.read().await;
        Ok(tables
            .resolved_values
            .get(entity_id)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn load_discrepancies(&self, entity_id: &str) -> Result<Vec<Discrepancy>> {
        let tables = self.tables.read().await;
        Ok(tables.discrepancies.get(entity_id).cloned().unwrap_or_default())
    }

    async fn commit_run(&self, commit: RunCommit) -> Result<()> {
        let mut tables = self.tables.write().await;
        let entity_id = commit.entity_id;

        let values = commit
            .resolved_values
            .into_iter()
            .map(|v| (v.field_name.clone(), v))
            .collect();
        tables.resolved_values.insert(entity_id.clone(), values);
        tables
            .discrepancies
            .insert(entity_id.clone(), commit.discrepancies);
        tables
            .review_items
            .insert(entity_id.clone(), commit.review_items);
        tables
            .trust_scores
            .insert(entity_id.clone(), commit.trust_score);
        tables.statuses.insert(entity_id.clone(), commit.status);
        match commit.refetch {
            Some(request) => {
                tables.refetch.insert(entity_id.clone(), request);
            }
            None => {
                tables.refetch.remove(&entity_id);
            }
        }
        tables.audit.push(commit.audit);

        let consumed: HashSet<Uuid> = commit.consumed_failures.into_iter().collect();
        for (failure, done) in tables.fetch_failures.iter_mut() {
            if consumed.contains(&failure.failure_id) {
                *done = true;
            }
        }
        Ok(())
    }

    async fn load_trust_score(&self, entity_id: &str) -> Result<Option<TrustScore>> {
        Ok(self.tables.read().await.trust_scores.get(entity_id).cloned())
    }

    async fn load_status(&self, entity_id: &str) -> Result<Option<EntityStatus>> {
        Ok(self.tables.read().await.statuses.get(entity_id).copied())
    }

    async fn load_audit_trail(&self, entity_id: &str) -> Result<Vec<AuditRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .iter()
            .filter(|a| a.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn review_queue(&self, limit: usize) -> Result<Vec<ReviewItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<ReviewItem> = tables.review_items.values().flatten().cloned().collect();
        items.sort_by(|a, b| {
            (a.created_at, &a.entity_id, &a.field).cmp(&(b.created_at, &b.entity_id, &b.field))
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn record_fetch_failures(&self, failures: &[FetchFailure]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for failure in failures {
            let known = tables
                .fetch_failures
                .iter()
                .any(|(f, _)| f.failure_id == failure.failure_id);
            if !known {
                tables.fetch_failures.push((failure.clone(), false));
            }
        }
        Ok(())
    }

    async fn pending_fetch_failures(&self, entity_id: &str) -> Result<Vec<FetchFailure>> {
        let tables = self.tables.read().await;
        let mut pending: Vec<FetchFailure> = tables
            .fetch_failures
            .iter()
            .filter(|(f, done)| !done && f.entity_id == entity_id)
            .map(|(f, _)| f.clone())
            .collect();
        pending.sort_by(|a, b| (a.occurred_at, a.failure_id).cmp(&(b.occurred_at, b.failure_id)));
        Ok(pending)
    }

    async fn refetch_queue(&self) -> Result<Vec<RefetchRequest>> {
        let tables = self.tables.read().await;
        let mut queue: Vec<RefetchRequest> = tables.refetch.values().cloned().collect();
        queue.sort_by(|a, b| (a.requested_at, &a.entity_id).cmp(&(b.requested_at, &b.entity_id)));
        Ok(queue)
    }
}
