//! Resolution Pipeline
//!
//! One run re-derives everything about an entity from its stored
//! SourceRecords and commits the result in a single store call:
//!
//! 1. **Classify** every field with claims (FACT / OPINION / DERIVED)
//! 2. **Cross-validate** FACT claims into ranked value groups
//! 3. **Resolve** one value per field
//! 4. **Consensus**: approve or queue each field
//! 5. **Derive** DERIVED fields from resolved inputs
//! 6. **Governance**: rules, decay, TrustScore, entity status
//! 7. **Commit** resolved values, discrepancies, review queue, trust score,
//!    status, refetch request and the audit record
//!
//! # Idempotence
//! A value whose inputs digest matches the stored one is kept as stored
//! (including `resolved_at`), so re-running on unchanged records is a no-op
//! for published values.
//!
//! # Error Handling
//! Data problems (missing sources, disagreements, rule failures) become
//! `RunOutcome`s on the audit trail. Only store failures and malformed
//! stored records surface as `PipelineError`, and only for this entity.

use super::{EntityLocks, ResolutionEvent};
use crate::classifier::ClaimClassifier;
use crate::config::ResolutionPolicy;
use crate::db::{FactStore, RunCommit};
use crate::fusion::{derive, ConflictResolver, ConsensusEngine, Derived};
use crate::governance::trust_score::explain;
use crate::governance::{EntitySnapshot, GovernanceValidator};
use crate::sources::{default_tier_for, prepare_batch, IngestBatch, IngestReport};
use crate::types::{
    AuditRecord, ClaimKind, ConsensusDecision, Discrepancy, DiscrepancyStatus, EntityKind,
    EntityStatus, FieldDecision, FieldValue, RefetchRequest, ResolvedValue, ReviewItem,
    RunOutcome, SourceRecord, TrustLevel,
};
use crate::validators::CrossValidator;
use chrono::{DateTime, Utc};
use cinefacts_common::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fatal error for a single entity run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No source records for entity {0}")]
    UnknownEntity(String),

    #[error("Malformed stored records for {entity_id}: {reason}")]
    MalformedRecord { entity_id: String, reason: String },

    #[error(transparent)]
    Store(#[from] Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Summary of one committed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRun {
    pub entity_id: String,
    pub run_id: Uuid,
    pub status: EntityStatus,
    pub overall_level: TrustLevel,
    pub resolved_fields: usize,
    pub queued_fields: usize,
    pub outcomes: Vec<RunOutcome>,
}

/// Editorial correction routed through the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Curation {
    pub entity_id: String,
    pub field: String,
    pub value: FieldValue,
    pub editor: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Everything the stages produced for one entity, before governance
#[derive(Default)]
struct FieldWork {
    resolved: BTreeMap<String, ResolvedValue>,
    decisions: BTreeMap<String, ConsensusDecision>,
    discrepancies: Vec<Discrepancy>,
    review_items: Vec<ReviewItem>,
    audit_decisions: Vec<FieldDecision>,
    outcomes: Vec<RunOutcome>,
}

pub struct ResolutionPipeline {
    store: Arc<dyn FactStore>,
    policy: Arc<ResolutionPolicy>,
    locks: EntityLocks,
    event_tx: Option<mpsc::Sender<ResolutionEvent>>,
}

impl ResolutionPipeline {
    pub fn new(store: Arc<dyn FactStore>, policy: Arc<ResolutionPolicy>) -> Self {
        Self {
            store,
            policy,
            locks: EntityLocks::new(),
            event_tx: None,
        }
    }

    /// Create a pipeline that reports progress on `event_tx`
    pub fn with_events(
        store: Arc<dyn FactStore>,
        policy: Arc<ResolutionPolicy>,
        event_tx: mpsc::Sender<ResolutionEvent>,
    ) -> Self {
        Self {
            event_tx: Some(event_tx),
            ..Self::new(store, policy)
        }
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn shared_policy(&self) -> Arc<ResolutionPolicy> {
        Arc::clone(&self.policy)
    }

    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    pub fn locks(&self) -> &EntityLocks {
        &self.locks
    }

    pub(crate) async fn emit_event(&self, event: ResolutionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Validate and store a fetcher batch
    ///
    /// Fetch failures are stored for the entity's next audit record; they
    /// never remove or replace data.
    pub async fn ingest(&self, batch: IngestBatch, ingested_at: DateTime<Utc>) -> PipelineResult<IngestReport> {
        let received = batch.records.len() + batch.payloads.len();
        let prepared = prepare_batch(batch, &self.policy, ingested_at);

        let stored = self.store.append_source_records(&prepared.records).await?;

        for failure in &prepared.failures {
            warn!(
                entity_id = %failure.entity_id,
                source_id = %failure.source_id,
                field = ?failure.field,
                reason = %failure.reason,
                "Source unavailable"
            );
        }
        self.store.record_fetch_failures(&prepared.failures).await?;

        let mut entities: Vec<String> = prepared
            .records
            .iter()
            .map(|r| r.entity_id.clone())
            .chain(prepared.failures.iter().map(|f| f.entity_id.clone()))
            .collect();
        entities.sort();
        entities.dedup();

        let report = IngestReport {
            received,
            stored,
            duplicates: prepared.records.len() - stored,
            failures_recorded: prepared.failures.len(),
            rejected: prepared.rejected,
            entities,
        };

        info!(
            received = report.received,
            stored = report.stored,
            duplicates = report.duplicates,
            rejected = report.rejected.len(),
            failures = report.failures_recorded,
            "Ingested batch"
        );
        Ok(report)
    }

    /// Apply an editorial correction and re-resolve the entity
    ///
    /// The correction is appended as an `editorial:<editor>` SourceRecord;
    /// resolved values are never written directly.
    pub async fn curate(&self, curation: Curation, as_of: DateTime<Utc>) -> PipelineResult<EntityRun> {
        let editor = curation.editor.trim();
        let field = curation.field.trim().to_lowercase();
        if editor.is_empty() || field.is_empty() || curation.entity_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "curation needs an entity, a field and an editor".to_string(),
            )
            .into());
        }
        if curation.value.is_no_claim() {
            return Err(Error::InvalidInput(format!(
                "curation of {}.{} carries no value",
                curation.entity_id, field
            ))
            .into());
        }

        let entity_id = curation.entity_id.trim();
        let existing = self.store.load_source_records(entity_id).await?;
        let entity_kind = existing
            .first()
            .map(|r| r.entity_kind)
            .unwrap_or_default();

        let source_id = format!("editorial:{}", editor);
        let tier = self
            .policy
            .source_info(&source_id, default_tier_for(&source_id))
            .tier;

        let record = SourceRecord {
            record_id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            entity_kind,
            field_name: field.clone(),
            value: curation.value,
            source_id,
            retrieved_at: as_of,
            source_trust_tier: tier,
        };
        self.store.append_source_records(&[record]).await?;

        info!(
            entity_id,
            field = %field,
            editor,
            note = curation.note.as_deref().unwrap_or(""),
            "Editorial correction recorded"
        );

        self.resolve_entity(entity_id, as_of).await
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Re-resolve one entity from its stored SourceRecords
    pub async fn resolve_entity(&self, entity_id: &str, as_of: DateTime<Utc>) -> PipelineResult<EntityRun> {
        let guard = self.locks.acquire(entity_id).await;

        self.emit_event(ResolutionEvent::EntityStarted {
            entity_id: entity_id.to_string(),
        })
        .await;

        let result = self.run_locked(entity_id, as_of).await;
        drop(guard);
        self.locks.release(entity_id).await;

        match &result {
            Ok(run) => {
                self.emit_event(ResolutionEvent::EntityResolved {
                    entity_id: entity_id.to_string(),
                    status: run.status,
                    overall_level: run.overall_level,
                    resolved_fields: run.resolved_fields,
                    queued_fields: run.queued_fields,
                })
                .await
            }
            Err(e) => {
                self.emit_event(ResolutionEvent::EntityFailed {
                    entity_id: entity_id.to_string(),
                    message: e.to_string(),
                })
                .await
            }
        }
        result
    }

    async fn run_locked(&self, entity_id: &str, as_of: DateTime<Utc>) -> PipelineResult<EntityRun> {
        let records = self.store.load_source_records(entity_id).await?;
        let failures = self.store.pending_fetch_failures(entity_id).await?;
        let previous_status = self.store.load_status(entity_id).await?;

        if records.is_empty() && failures.is_empty() && previous_status.is_none() {
            return Err(PipelineError::UnknownEntity(entity_id.to_string()));
        }

        let entity_kind = entity_kind_of(entity_id, &records)?;
        let previous: BTreeMap<String, ResolvedValue> = self
            .store
            .load_resolved_values(entity_id)
            .await?
            .into_iter()
            .map(|v| (v.field_name.clone(), v))
            .collect();

        let run_id = Uuid::new_v4();
        debug!(entity_id, run_id = %run_id, records = records.len(), "Resolving entity");

        let mut work = FieldWork::default();

        for failure in &failures {
            work.outcomes.push(RunOutcome::SourceUnavailable {
                source_id: failure.source_id.clone(),
                field: failure.field.clone(),
                reason: failure.reason.clone(),
            });
        }

        let mut by_field: BTreeMap<&str, Vec<&SourceRecord>> = BTreeMap::new();
        for record in &records {
            by_field
                .entry(record.field_name.as_str())
                .or_default()
                .push(record);
        }

        let classifier = ClaimClassifier::new(&self.policy);
        for (field, field_records) in &by_field {
            match classifier.classify(field) {
                ClaimKind::Fact => self.resolve_fact_field(entity_id, field, field_records, as_of, &mut work),
                ClaimKind::Opinion => {
                    self.resolve_opinion_field(entity_id, field, field_records, as_of, &mut work)
                }
                ClaimKind::Derived => work.audit_decisions.push(FieldDecision {
                    field: field.to_string(),
                    claim: ClaimKind::Derived,
                    method: None,
                    confidence: None,
                    decision: None,
                    rationale: format!(
                        "{} source record(s) ignored: DERIVED fields are recomputed",
                        field_records.len()
                    ),
                }),
            }
        }

        self.derive_fields(entity_id, as_of, &mut work);

        // Unchanged inputs keep the stored value bit-identical
        for (field, value) in work.resolved.iter_mut() {
            if let Some(stored) = previous.get(field) {
                if stored.inputs_digest == value.inputs_digest {
                    *value = stored.clone();
                }
            }
        }

        let snapshot = EntitySnapshot {
            entity_id,
            entity_kind,
            resolved: &work.resolved,
            decisions: &work.decisions,
            discrepancies: &work.discrepancies,
            as_of,
        };
        let mut report = GovernanceValidator::new(&self.policy).evaluate(&snapshot);
        work.outcomes.append(&mut report.outcomes);

        // Decayed fields are re-queued even when a critical rule blocks the
        // entity; blocked only wins for the status.
        let mut status = report.status;
        let mut refetch = None;
        if !report.stale_fields.is_empty() {
            for (field, decayed) in &report.stale_fields {
                work.review_items.push(ReviewItem {
                    item_id: Uuid::new_v4(),
                    entity_id: entity_id.to_string(),
                    field: field.clone(),
                    reason: format!(
                        "decayed confidence {:.2} below approval threshold {:.2}",
                        decayed, self.policy.thresholds.auto_approve_threshold
                    ),
                    confidence: Some(*decayed),
                    candidate: work.resolved.get(field).map(|v| v.value.clone()),
                    discrepancy: None,
                    created_at: as_of,
                });
            }
            refetch = Some(RefetchRequest {
                entity_id: entity_id.to_string(),
                fields: report.stale_fields.iter().map(|(f, _)| f.clone()).collect(),
                reason: "stale data: decayed below approval threshold".to_string(),
                requested_at: as_of,
            });
            if status == EntityStatus::Stale {
                status = EntityStatus::ReQueued;
            }
        }

        let mut trust_score = report.trust_score;
        if trust_score.status != status {
            trust_score.status = status;
            trust_score.explanation = explain(
                status,
                trust_score.overall_level,
                &trust_score.breakdown_by_rule,
                &trust_score.field_confidences,
            );
        }

        let queued_fields = work
            .decisions
            .values()
            .filter(|d| !d.is_approved())
            .count();
        let overall_level = trust_score.overall_level;

        let audit = AuditRecord {
            entity_id: entity_id.to_string(),
            run_id,
            timestamp: as_of,
            fields_touched: work.audit_decisions.iter().map(|d| d.field.clone()).collect(),
            decisions: work.audit_decisions,
            outcomes: work.outcomes.clone(),
            status,
        };

        let resolved_fields = work.resolved.len();
        self.store
            .commit_run(RunCommit {
                entity_id: entity_id.to_string(),
                resolved_values: work.resolved.into_values().collect(),
                discrepancies: work.discrepancies,
                review_items: work.review_items,
                trust_score,
                status,
                refetch,
                audit,
                consumed_failures: failures.iter().map(|f| f.failure_id).collect(),
            })
            .await?;

        info!(
            entity_id,
            run_id = %run_id,
            status = %status,
            trust = ?overall_level,
            resolved = resolved_fields,
            queued = queued_fields,
            "Entity resolved"
        );

        Ok(EntityRun {
            entity_id: entity_id.to_string(),
            run_id,
            status,
            overall_level,
            resolved_fields,
            queued_fields,
            outcomes: work.outcomes,
        })
    }

    fn resolve_fact_field(
        &self,
        entity_id: &str,
        field: &str,
        records: &[&SourceRecord],
        as_of: DateTime<Utc>,
        work: &mut FieldWork,
    ) {
        let assessment = CrossValidator::new(&self.policy).assess(entity_id, field, records);

        let Some(resolution) = ConflictResolver::new(&self.policy).resolve_fact(&assessment, as_of)
        else {
            work.audit_decisions.push(FieldDecision {
                field: field.to_string(),
                claim: ClaimKind::Fact,
                method: None,
                confidence: None,
                decision: None,
                rationale: format!(
                    "no claims ({} record(s) carried no value)",
                    assessment.dropped_no_claim
                ),
            });
            return;
        };

        let decision = ConsensusEngine::new(&self.policy).decide_fact(&resolution);
        let approved = decision.is_approved();

        let discrepancy = assessment.discrepancy.clone().map(|mut d| {
            d.status = if approved {
                DiscrepancyStatus::Consumed
            } else {
                DiscrepancyStatus::Escalated
            };
            d
        });

        if !approved {
            if assessment.has_critical_discrepancy() {
                work.outcomes.push(RunOutcome::CriticalDiscrepancy {
                    field: field.to_string(),
                });
            }
            if let ConsensusDecision::QueueForReview { reason } = &decision {
                work.review_items.push(ReviewItem {
                    item_id: Uuid::new_v4(),
                    entity_id: entity_id.to_string(),
                    field: field.to_string(),
                    reason: reason.clone(),
                    confidence: Some(resolution.value.confidence_score),
                    candidate: Some(resolution.value.value.clone()),
                    discrepancy: discrepancy.clone(),
                    created_at: as_of,
                });
            }
        }

        let mut rationale = resolution.notes.clone();
        rationale.push(format!(
            "agreement {:.2} across {} origin(s)",
            assessment.agreement_confidence,
            assessment.total_support()
        ));

        debug!(
            entity_id,
            field,
            method = %resolution.value.resolution_method,
            confidence = resolution.value.confidence_score,
            approved,
            "FACT field decided"
        );

        work.audit_decisions.push(FieldDecision {
            field: field.to_string(),
            claim: ClaimKind::Fact,
            method: Some(resolution.value.resolution_method),
            confidence: Some(resolution.value.confidence_score),
            decision: Some(decision.clone()),
            rationale: rationale.join("; "),
        });
        if let Some(d) = discrepancy {
            work.discrepancies.push(d);
        }
        work.decisions.insert(field.to_string(), decision);
        work.resolved.insert(field.to_string(), resolution.value);
    }

    fn resolve_opinion_field(
        &self,
        entity_id: &str,
        field: &str,
        records: &[&SourceRecord],
        as_of: DateTime<Utc>,
        work: &mut FieldWork,
    ) {
        let opinion = ConflictResolver::new(&self.policy).resolve_opinion(entity_id, field, records, as_of);
        let decision = ConsensusEngine::new(&self.policy).decide_opinion(&opinion);

        let rationale = match (&opinion.editor, opinion.automated_claims) {
            (Some(editor), _) => format!("authored by editor {}", editor),
            (None, 0) => "no claims".to_string(),
            (None, n) => format!("{} automated claim(s) rejected from auto-approval", n),
        };

        if let Some(ConsensusDecision::QueueForReview { reason }) = &decision {
            work.review_items.push(ReviewItem {
                item_id: Uuid::new_v4(),
                entity_id: entity_id.to_string(),
                field: field.to_string(),
                reason: reason.clone(),
                confidence: None,
                candidate: opinion.automated_candidate.clone(),
                discrepancy: None,
                created_at: as_of,
            });
        }

        work.audit_decisions.push(FieldDecision {
            field: field.to_string(),
            claim: ClaimKind::Opinion,
            method: opinion.value.as_ref().map(|v| v.resolution_method),
            confidence: opinion.value.as_ref().map(|v| v.confidence_score),
            decision: decision.clone(),
            rationale,
        });
        if let Some(decision) = decision {
            work.decisions.insert(field.to_string(), decision);
        }
        if let Some(value) = opinion.value {
            work.resolved.insert(field.to_string(), value);
        }
    }

    fn derive_fields(&self, entity_id: &str, as_of: DateTime<Utc>, work: &mut FieldWork) {
        let consensus = ConsensusEngine::new(&self.policy);

        for (field, derivation) in self.policy.derived_fields() {
            let inputs = derivation.inputs();
            if !inputs.iter().any(|input| work.resolved.contains_key(*input)) {
                continue;
            }

            match derive(&self.policy, entity_id, field, derivation, &work.resolved, as_of) {
                Derived::Value(value) => {
                    let unapproved: Vec<String> = inputs
                        .iter()
                        .filter(|input| {
                            !work
                                .decisions
                                .get(**input)
                                .is_some_and(ConsensusDecision::is_approved)
                        })
                        .map(|input| input.to_string())
                        .collect();
                    let decision = consensus.decide_derived(&unapproved);

                    if let ConsensusDecision::QueueForReview { reason } = &decision {
                        work.review_items.push(ReviewItem {
                            item_id: Uuid::new_v4(),
                            entity_id: entity_id.to_string(),
                            field: field.clone(),
                            reason: reason.clone(),
                            confidence: Some(value.confidence_score),
                            candidate: Some(value.value.clone()),
                            discrepancy: None,
                            created_at: as_of,
                        });
                    }

                    work.audit_decisions.push(FieldDecision {
                        field: field.clone(),
                        claim: ClaimKind::Derived,
                        method: Some(value.resolution_method),
                        confidence: Some(value.confidence_score),
                        decision: Some(decision.clone()),
                        rationale: format!("derived from {} and {}", inputs[0], inputs[1]),
                    });
                    work.decisions.insert(field.clone(), decision);
                    work.resolved.insert(field.clone(), value);
                }
                Derived::Skipped(reason) => {
                    debug!(entity_id, field = %field, reason = %reason, "Derivation skipped");
                    work.audit_decisions.push(FieldDecision {
                        field: field.clone(),
                        claim: ClaimKind::Derived,
                        method: None,
                        confidence: None,
                        decision: None,
                        rationale: reason,
                    });
                }
            }
        }
    }
}

/// Kind shared by all of the entity's records
fn entity_kind_of(entity_id: &str, records: &[SourceRecord]) -> PipelineResult<EntityKind> {
    let Some(first) = records.first() else {
        return Ok(EntityKind::default());
    };
    if let Some(other) = records.iter().find(|r| r.entity_kind != first.entity_kind) {
        return Err(PipelineError::MalformedRecord {
            entity_id: entity_id.to_string(),
            reason: format!(
                "records disagree on entity kind ({} vs {})",
                first.entity_kind, other.entity_kind
            ),
        });
    }
    Ok(first.entity_kind)
}
