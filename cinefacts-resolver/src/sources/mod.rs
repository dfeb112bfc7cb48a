//! Ingestion
//!
//! Turns fetcher output (generic records or provider payloads) into
//! immutable `SourceRecord`s and collects fetch failures. Malformed input is
//! rejected per record; the rest of the batch goes through.

pub mod providers;

pub use providers::ProviderPayload;

use crate::config::ResolutionPolicy;
use crate::types::{EntityKind, FetchFailure, FieldValue, SourceRecord, TrustTier};
use chrono::{DateTime, Utc};
use cinefacts_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Generic fetcher record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: Option<String>,
    #[serde(alias = "field_name")]
    pub field: String,
    #[serde(default = "null_value")]
    pub value: FieldValue,
    #[serde(alias = "source_id")]
    pub source_name: String,
    /// RFC 3339; ingest time when absent
    #[serde(default)]
    pub retrieved_at: Option<String>,
}

fn null_value() -> FieldValue {
    FieldValue::Null
}

/// Fetcher failure as reported by the fetcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingFailure {
    pub entity_id: String,
    #[serde(alias = "source_id")]
    pub source: String,
    #[serde(default)]
    pub field: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub occurred_at: Option<String>,
}

/// One ingest call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub records: Vec<IncomingRecord>,
    #[serde(default)]
    pub payloads: Vec<ProviderPayload>,
    #[serde(default)]
    pub failures: Vec<IncomingFailure>,
}

impl IngestBatch {
    /// Parse a batch document, or a bare array of generic records
    pub fn from_json(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            Batch(IngestBatch),
            Records(Vec<IncomingRecord>),
        }

        match serde_json::from_str::<Document>(content) {
            Ok(Document::Batch(batch)) => Ok(batch),
            Ok(Document::Records(records)) => Ok(IngestBatch {
                records,
                ..Default::default()
            }),
            Err(e) => Err(Error::InvalidInput(format!("Unreadable ingest batch: {}", e))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.payloads.is_empty() && self.failures.is_empty()
    }
}

/// A claim on its way to becoming a SourceRecord
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Draft {
    pub entity_id: String,
    pub entity_kind: Option<String>,
    pub field: String,
    pub value: FieldValue,
    pub source_id: String,
    pub retrieved_at: Option<String>,
}

impl From<IncomingRecord> for Draft {
    fn from(record: IncomingRecord) -> Self {
        Draft {
            entity_id: record.entity_id,
            entity_kind: record.entity_kind,
            field: record.field,
            value: record.value,
            source_id: record.source_name,
            retrieved_at: record.retrieved_at,
        }
    }
}

/// Input that did not make it into the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub entity_id: Option<String>,
    pub reason: String,
}

/// Validated batch, ready to append
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBatch {
    pub records: Vec<SourceRecord>,
    pub failures: Vec<FetchFailure>,
    pub rejected: Vec<Rejection>,
}

/// Summary returned to the caller of an ingest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failures_recorded: usize,
    pub rejected: Vec<Rejection>,
    /// Entities touched by stored records or failures
    pub entities: Vec<String>,
}

/// Validate and normalize a batch
pub fn prepare_batch(
    batch: IngestBatch,
    policy: &ResolutionPolicy,
    ingested_at: DateTime<Utc>,
) -> PreparedBatch {
    let mut prepared = PreparedBatch::default();

    let mut drafts: Vec<Draft> = batch.records.into_iter().map(Draft::from).collect();
    for payload in batch.payloads {
        let entity_id = payload.entity_id().to_string();
        let provider = payload.provider();
        match payload.into_drafts() {
            Ok(more) => drafts.extend(more),
            Err(e) => reject(&mut prepared, Some(entity_id), format!("{} payload: {}", provider, e)),
        }
    }

    for draft in drafts {
        let entity_id = draft.entity_id.clone();
        match finalize(draft, policy, ingested_at) {
            Ok(Some(record)) => prepared.records.push(record),
            Ok(None) => {}
            Err(e) => reject(&mut prepared, Some(entity_id), e.to_string()),
        }
    }

    for failure in batch.failures {
        let entity_id = failure.entity_id.clone();
        match failure_from(failure, ingested_at) {
            Ok(failure) => prepared.failures.push(failure),
            Err(e) => reject(&mut prepared, Some(entity_id), e.to_string()),
        }
    }

    prepared
}

fn reject(prepared: &mut PreparedBatch, entity_id: Option<String>, reason: String) {
    warn!(entity_id = ?entity_id, reason = %reason, "Rejected ingest input");
    prepared.rejected.push(Rejection { entity_id, reason });
}

/// Validate one draft. `Ok(None)` for a no-claim value, which is not stored.
fn finalize(
    draft: Draft,
    policy: &ResolutionPolicy,
    ingested_at: DateTime<Utc>,
) -> Result<Option<SourceRecord>> {
    let entity_id = draft.entity_id.trim();
    if entity_id.is_empty() {
        return Err(Error::InvalidInput("empty entity id".to_string()));
    }
    let field = draft.field.trim().to_lowercase();
    if field.is_empty() {
        return Err(Error::InvalidInput(format!(
            "empty field name for entity {}",
            entity_id
        )));
    }
    let source_id = draft.source_id.trim();
    if source_id.is_empty() {
        return Err(Error::InvalidInput(format!(
            "empty source for {}.{}",
            entity_id, field
        )));
    }
    if policy.strict_sources && !policy.has_source_profile(source_id) {
        return Err(Error::InvalidInput(format!(
            "source '{}' has no profile in policy {}",
            source_id, policy.version
        )));
    }

    let entity_kind = parse_entity_kind(draft.entity_kind.as_deref())?;
    let retrieved_at = match draft.retrieved_at.as_deref() {
        Some(raw) => parse_timestamp(raw)?,
        None => ingested_at,
    };

    if draft.value.is_no_claim() {
        return Ok(None);
    }

    let tier = policy.source_info(source_id, default_tier_for(source_id)).tier;

    Ok(Some(SourceRecord {
        record_id: Uuid::new_v4(),
        entity_id: entity_id.to_string(),
        entity_kind,
        field_name: field,
        value: draft.value,
        source_id: source_id.to_string(),
        retrieved_at,
        source_trust_tier: tier,
    }))
}

fn failure_from(failure: IncomingFailure, ingested_at: DateTime<Utc>) -> Result<FetchFailure> {
    if failure.entity_id.trim().is_empty() || failure.source.trim().is_empty() {
        return Err(Error::InvalidInput(
            "fetch failure without entity or source".to_string(),
        ));
    }
    let occurred_at = match failure.occurred_at.as_deref() {
        Some(raw) => parse_timestamp(raw)?,
        None => ingested_at,
    };
    Ok(FetchFailure {
        failure_id: Uuid::new_v4(),
        entity_id: failure.entity_id.trim().to_string(),
        source_id: failure.source.trim().to_string(),
        field: failure.field.map(|f| f.trim().to_lowercase()),
        reason: failure.reason,
        occurred_at,
    })
}

fn parse_entity_kind(raw: Option<&str>) -> Result<EntityKind> {
    match raw.map(|k| k.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("movie") | Some("film") => Ok(EntityKind::Movie),
        Some("celebrity") | Some("person") => Ok(EntityKind::Celebrity),
        Some(other) => Err(Error::InvalidInput(format!("unknown entity kind '{}'", other))),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("unparseable timestamp '{}': {}", raw, e)))
}

/// Tier assumed for a source the policy has no profile for
pub fn default_tier_for(source_id: &str) -> TrustTier {
    let provider = source_id.split(':').next().unwrap_or(source_id);
    match provider {
        "editorial" => TrustTier::Editorial,
        "cbfc" => TrustTier::Official,
        "wikidata" | "wikipedia" => TrustTier::Curated,
        "tmdb" | "omdb" | "imdb" => TrustTier::Aggregator,
        _ => TrustTier::Community,
    }
}
