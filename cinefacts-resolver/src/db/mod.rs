//! Persistence port
//!
//! `FactStore` is the only way the engine touches storage. It is built once
//! per process and passed around as `Arc<dyn FactStore>`; there is no global
//! client.
//!
//! Adapters:
//! - [`SqliteFactStore`]: sqlx over SQLite (WAL, busy timeout, lock retry)
//! - [`InMemoryFactStore`]: tokio `RwLock` maps, for tests and `--ephemeral`

pub mod memory;
pub mod schema;
pub mod sqlite;

pub use memory::InMemoryFactStore;
pub use sqlite::SqliteFactStore;

use crate::types::{
    AuditRecord, Discrepancy, EntityStatus, FetchFailure, RefetchRequest, ResolvedValue,
    ReviewItem, SourceRecord, TrustScore,
};
use async_trait::async_trait;
use cinefacts_common::Result;
use uuid::Uuid;

/// Everything one resolution run writes, committed atomically
///
/// Replaces the entity's resolved values, discrepancies, pending review items,
/// trust score, status and refetch request; appends the audit record; marks
/// the consumed fetch failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCommit {
    pub entity_id: String,
    pub resolved_values: Vec<ResolvedValue>,
    pub discrepancies: Vec<Discrepancy>,
    pub review_items: Vec<ReviewItem>,
    pub trust_score: TrustScore,
    pub status: EntityStatus,
    /// `None` clears any pending request for the entity
    pub refetch: Option<RefetchRequest>,
    pub audit: AuditRecord,
    pub consumed_failures: Vec<Uuid>,
}

#[async_trait]
pub trait FactStore: Send + Sync {
    /// Append source records; exact re-ingests are ignored. Returns the
    /// number of records actually stored.
    async fn append_source_records(&self, records: &[SourceRecord]) -> Result<usize>;

    async fn load_source_records(&self, entity_id: &str) -> Result<Vec<SourceRecord>>;

    /// Every entity with at least one source record, sorted
    async fn list_entities(&self) -> Result<Vec<String>>;

    async fn load_resolved_values(&self, entity_id: &str) -> Result<Vec<ResolvedValue>>;

    async fn get_resolved_value(&self, entity_id: &str, field: &str) -> Result<Option<ResolvedValue>>;

    async fn load_discrepancies(&self, entity_id: &str) -> Result<Vec<Discrepancy>>;

    async fn commit_run(&self, commit: RunCommit) -> Result<()>;

    async fn load_trust_score(&self, entity_id: &str) -> Result<Option<TrustScore>>;

    async fn load_status(&self, entity_id: &str) -> Result<Option<EntityStatus>>;

    /// Audit records for the entity, oldest first
    async fn load_audit_trail(&self, entity_id: &str) -> Result<Vec<AuditRecord>>;

    /// Pending review items, oldest first
    async fn review_queue(&self, limit: usize) -> Result<Vec<ReviewItem>>;

    async fn record_fetch_failures(&self, failures: &[FetchFailure]) -> Result<()>;

    /// Failures not yet attached to an audit record
    async fn pending_fetch_failures(&self, entity_id: &str) -> Result<Vec<FetchFailure>>;

    async fn refetch_queue(&self) -> Result<Vec<RefetchRequest>>;
}
