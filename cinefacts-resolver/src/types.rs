//! Core Types and Data Contracts
//!
//! Defines the explicit contracts between the stages of the resolution
//! pipeline:
//! - **Ingestion:** `SourceRecord` (immutable, append-only)
//! - **Cross-validation / resolution:** `ResolvedValue`, `Discrepancy`
//! - **Consensus:** `ConsensusDecision`, `ReviewItem`
//! - **Governance:** `RuleOutcome`, `TrustScore`, `EntityStatus`
//! - **Audit:** `AuditRecord`, `RunOutcome`
//!
//! Every type here round-trips through serde so it can be persisted as JSON
//! and served by the query surface unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Entities and values
// ============================================================================

/// Kind of entity a fact belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Movie,
    Celebrity,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Movie => write!(f, "movie"),
            EntityKind::Celebrity => write!(f, "celebrity"),
        }
    }
}

/// JSON-shaped field value
///
/// `Null`, blank text and empty lists are "no claim": a source that sends
/// them is not competing with anyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// True when the value carries no claim
    pub fn is_no_claim(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|i| i.trim().is_empty()),
            FieldValue::Number(n) => !n.is_finite(),
            FieldValue::Integer(_) => false,
        }
    }

    /// Numeric view of the value (text is parsed leniently: "7.2", "1,20,00,000")
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Text(s) => {
                let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
                cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    /// True when the value is numeric (or numeric text)
    pub fn is_numeric(&self) -> bool {
        self.as_f64().is_some()
    }

    /// Text view of the value, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Items of a list value, or the single text value as a one-item list
    pub fn as_items(&self) -> Vec<String> {
        match self {
            FieldValue::List(items) => items.clone(),
            FieldValue::Text(s) => vec![s.clone()],
            FieldValue::Integer(i) => vec![i.to_string()],
            FieldValue::Number(n) => vec![n.to_string()],
            FieldValue::Null => Vec::new(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, "null"),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

// ============================================================================
// Sources
// ============================================================================

/// Rank of a provider in the source hierarchy
///
/// Declaration order is the default hierarchy (highest first). Individual
/// field categories may declare a different order in the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Staff editorial curation (human authored)
    Editorial,
    /// Regional official sources (producers, certification boards)
    Official,
    /// Nationally curated knowledge bases (Wikidata, Wikipedia)
    Curated,
    /// Aggregators (TMDB and similar)
    Aggregator,
    /// Fan and community sites
    Community,
}

impl TrustTier {
    /// Default hierarchy, highest tier first
    pub const ALL: [TrustTier; 5] = [
        TrustTier::Editorial,
        TrustTier::Official,
        TrustTier::Curated,
        TrustTier::Aggregator,
        TrustTier::Community,
    ];

    /// Base trust used when a source profile does not declare one
    pub fn default_trust(self) -> f64 {
        match self {
            TrustTier::Editorial => 0.95,
            TrustTier::Official => 0.9,
            TrustTier::Curated => 0.8,
            TrustTier::Aggregator => 0.7,
            TrustTier::Community => 0.5,
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrustTier::Editorial => "editorial",
            TrustTier::Official => "official",
            TrustTier::Curated => "curated",
            TrustTier::Aggregator => "aggregator",
            TrustTier::Community => "community",
        };
        write!(f, "{}", name)
    }
}

/// One provider's claimed value for one field of one entity
///
/// Immutable once stored. Several records may exist per (entity, field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub record_id: Uuid,
    pub entity_id: String,
    #[serde(default)]
    pub entity_kind: EntityKind,
    pub field_name: String,
    pub value: FieldValue,
    pub source_id: String,
    pub retrieved_at: DateTime<Utc>,
    pub source_trust_tier: TrustTier,
}

/// Fetcher failure reported alongside an ingest batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    #[serde(default = "Uuid::new_v4")]
    pub failure_id: Uuid,
    pub entity_id: String,
    pub source_id: String,
    #[serde(default)]
    pub field: Option<String>,
    pub reason: String,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

// ============================================================================
// Classification
// ============================================================================

/// Semantic class of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    /// Independently verifiable from an external source
    Fact,
    /// Subjective editorial assessment
    Opinion,
    /// Computed from other stored fields
    Derived,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimKind::Fact => write!(f, "FACT"),
            ClaimKind::Opinion => write!(f, "OPINION"),
            ClaimKind::Derived => write!(f, "DERIVED"),
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// How a resolved value was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    SingleSource,
    Agreement,
    TrustHierarchy,
    Majority,
    TieUnresolved,
    WeightedBlend,
    Editorial,
    Derived,
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionMethod::SingleSource => "single_source",
            ResolutionMethod::Agreement => "agreement",
            ResolutionMethod::TrustHierarchy => "trust_hierarchy",
            ResolutionMethod::Majority => "majority",
            ResolutionMethod::TieUnresolved => "tie_unresolved",
            ResolutionMethod::WeightedBlend => "weighted_blend",
            ResolutionMethod::Editorial => "editorial",
            ResolutionMethod::Derived => "derived",
        };
        write!(f, "{}", name)
    }
}

/// A source that contributed to a resolved value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingSource {
    pub source_id: String,
    pub tier: TrustTier,
    pub trust: f64,
    pub retrieved_at: DateTime<Utc>,
}

/// The system's current answer for (entity, field)
///
/// Replaced wholesale on every re-resolution. `confidence_score` is a pure
/// function of the contributing records and the policy; `inputs_digest`
/// identifies those inputs so an unchanged re-run keeps the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedValue {
    pub entity_id: String,
    pub field_name: String,
    pub value: FieldValue,
    pub confidence_score: f64,
    pub contributing_sources: Vec<ContributingSource>,
    pub resolution_method: ResolutionMethod,
    pub resolved_at: DateTime<Utc>,
    /// Newest `retrieved_at` among contributing records
    pub observed_at: DateTime<Utc>,
    pub inputs_digest: String,
}

impl ResolvedValue {
    /// True when any contributor sits at or above `tier` in the default order
    pub fn has_source_at_or_above(&self, tier: TrustTier) -> bool {
        self.contributing_sources.iter().any(|s| s.tier <= tier)
    }
}

// ============================================================================
// Discrepancies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancySeverity {
    /// Semantically contradictory values (different years, different names)
    Critical,
    /// Near-duplicates (spelling variants)
    Informational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyStatus {
    Open,
    /// Resolved value was approved; the discrepancy is settled
    Consumed,
    /// Handed to a human reviewer
    Escalated,
}

/// One side of a disagreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingValue {
    pub value: FieldValue,
    pub normalized: String,
    pub sources: Vec<String>,
}

/// Disagreement between sources for the same (entity, field)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub entity_id: String,
    pub field: String,
    pub conflicting_values: Vec<ConflictingValue>,
    pub severity: DiscrepancySeverity,
    pub status: DiscrepancyStatus,
}

// ============================================================================
// Consensus
// ============================================================================

/// Why a value was approved without review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalBasis {
    IndependentAgreement { sources: usize },
    AuthoritativeSource { source_id: String },
    HumanAuthored { editor: String },
    Derived,
}

/// Publish gate decision for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ConsensusDecision {
    AutoApprove { basis: ApprovalBasis },
    QueueForReview { reason: String },
}

impl ConsensusDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, ConsensusDecision::AutoApprove { .. })
    }
}

/// Pending entry in the human review queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub item_id: Uuid,
    pub entity_id: String,
    pub field: String,
    pub reason: String,
    pub confidence: Option<f64>,
    pub candidate: Option<FieldValue>,
    pub discrepancy: Option<Discrepancy>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Governance
// ============================================================================

/// Publish state of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Pending,
    Validated,
    Blocked,
    Stale,
    ReQueued,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityStatus::Pending => "pending",
            EntityStatus::Validated => "validated",
            EntityStatus::Blocked => "blocked",
            EntityStatus::Stale => "stale",
            EntityStatus::ReQueued => "re_queued",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSeverity {
    /// Failure blocks publishing
    Critical,
    /// Failure is recorded in the explanation trail only
    Warning,
}

/// Result of evaluating one governance rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub version: u32,
    pub severity: RuleSeverity,
    pub passed: bool,
    pub explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
}

/// Stored and decayed confidence for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub field: String,
    pub stored: f64,
    pub decayed: f64,
    pub approved: bool,
}

/// Explainable per-entity trust assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustScore {
    pub entity_id: String,
    pub breakdown_by_rule: Vec<RuleOutcome>,
    pub field_confidences: Vec<FieldConfidence>,
    pub overall_level: TrustLevel,
    pub explanation: String,
    pub status: EntityStatus,
    pub policy_version: String,
    pub evaluated_at: DateTime<Utc>,
}

/// Request for external fetchers to refresh an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefetchRequest {
    pub entity_id: String,
    pub fields: Vec<String>,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

// ============================================================================
// Audit trail
// ============================================================================

/// Structured non-fatal outcome recorded on the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    SourceUnavailable {
        source_id: String,
        field: Option<String>,
        reason: String,
    },
    InsufficientData {
        field: String,
    },
    CriticalDiscrepancy {
        field: String,
    },
    GovernanceViolation {
        rule: String,
        explanation: String,
    },
    StaleData {
        field: String,
        decayed_confidence: f64,
    },
}

/// What happened to one field during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecision {
    pub field: String,
    pub claim: ClaimKind,
    pub method: Option<ResolutionMethod>,
    pub confidence: Option<f64>,
    pub decision: Option<ConsensusDecision>,
    pub rationale: String,
}

/// Append-only record of one resolution run for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub entity_id: String,
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub fields_touched: Vec<String>,
    pub decisions: Vec<FieldDecision>,
    pub outcomes: Vec<RunOutcome>,
    pub status: EntityStatus,
}
