// Fact Cross-Validator - groups independent claims by normalized value
//
// Claims are first reduced to one per independent origin (latest record per
// source, syndicators folded into the source they copy), then grouped by
// normalized key. More than one group yields a Discrepancy.

use crate::config::{CategoryPolicy, ResolutionPolicy};
use crate::types::{
    ConflictingValue, Discrepancy, DiscrepancySeverity, DiscrepancyStatus, FieldValue,
    SourceRecord, TrustTier,
};
use crate::validators::normalize::{normalize_value, similarity, NormalizedValue};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// One independent origin's claim after pre-processing
#[derive(Debug, Clone, PartialEq)]
pub struct OriginClaim {
    pub origin: String,
    /// Source whose record represents the origin
    pub source_id: String,
    pub tier: TrustTier,
    pub trust: f64,
    pub automated: bool,
    pub retrieved_at: DateTime<Utc>,
    pub value: FieldValue,
    pub normalized: NormalizedValue,
}

/// Claims that normalize to the same key
#[derive(Debug, Clone, PartialEq)]
pub struct ValueGroup {
    pub key: String,
    pub normalized: NormalizedValue,
    /// Representative raw value (from the most trusted member)
    pub value: FieldValue,
    /// Members ordered by trust (descending), then source id
    pub members: Vec<OriginClaim>,
    /// Best hierarchy position among members (0 = top tier)
    pub best_rank: usize,
}

impl ValueGroup {
    /// Number of independent origins backing this value
    pub fn support(&self) -> usize {
        self.members.len()
    }

    pub fn best_trust(&self) -> f64 {
        self.members.iter().map(|m| m.trust).fold(0.0, f64::max)
    }

    pub fn summed_trust(&self) -> f64 {
        self.members.iter().map(|m| m.trust).sum()
    }

    pub fn best_tier(&self) -> Option<TrustTier> {
        self.members.iter().map(|m| m.tier).min()
    }

    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.members.iter().map(|m| m.source_id.clone()).collect();
        ids.sort();
        ids
    }
}

/// Output of cross-validation for one (entity, field)
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAssessment {
    pub entity_id: String,
    pub field: String,
    /// Ranked best first (hierarchy, support, summed trust, key)
    pub groups: Vec<ValueGroup>,
    pub discrepancy: Option<Discrepancy>,
    /// 1.0 for full agreement, winner share of support otherwise
    pub agreement_confidence: f64,
    /// Records that carried no claim
    pub dropped_no_claim: usize,
}

impl FieldAssessment {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_support(&self) -> usize {
        self.groups.iter().map(ValueGroup::support).sum()
    }

    /// All origin claims, in group order
    pub fn claims(&self) -> impl Iterator<Item = &OriginClaim> {
        self.groups.iter().flat_map(|g| g.members.iter())
    }

    pub fn has_critical_discrepancy(&self) -> bool {
        self.discrepancy
            .as_ref()
            .is_some_and(|d| d.severity == DiscrepancySeverity::Critical)
    }
}

/// Cross-validates FACT claims against each other
pub struct CrossValidator<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> CrossValidator<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        Self { policy }
    }

    /// Assess all records of one (entity, field)
    pub fn assess(&self, entity_id: &str, field: &str, records: &[&SourceRecord]) -> FieldAssessment {
        let category = self.policy.category_for(field);
        let precision = self.policy.precision_for(field);

        let (claims, dropped_no_claim) = self.origin_claims(records, precision);
        let groups = rank_groups(group_claims(claims), &category);

        let discrepancy = if groups.len() > 1 {
            Some(self.discrepancy(entity_id, field, &groups))
        } else {
            None
        };

        let agreement_confidence = self.agreement_confidence(&groups);

        debug!(
            entity_id,
            field,
            groups = groups.len(),
            origins = groups.iter().map(ValueGroup::support).sum::<usize>(),
            dropped_no_claim,
            "Cross-validated field"
        );

        FieldAssessment {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            groups,
            discrepancy,
            agreement_confidence,
            dropped_no_claim,
        }
    }

    /// Reduce records to one claim per independent origin
    fn origin_claims(&self, records: &[&SourceRecord], precision: u32) -> (Vec<OriginClaim>, usize) {
        let mut dropped = 0;

        // Latest record per source
        let mut latest: BTreeMap<&str, &SourceRecord> = BTreeMap::new();
        for &record in records {
            if record.value.is_no_claim() {
                dropped += 1;
                continue;
            }
            latest
                .entry(record.source_id.as_str())
                .and_modify(|current| {
                    if newer(record, *current) {
                        *current = record;
                    }
                })
                .or_insert(record);
        }

        // One claim per origin: the origin's own record wins over syndicators,
        // otherwise the latest syndicated copy
        let mut by_origin: BTreeMap<String, OriginClaim> = BTreeMap::new();
        for record in latest.values() {
            let info = self
                .policy
                .source_info(&record.source_id, record.source_trust_tier);
            let Some(normalized) = normalize_value(&record.value, precision, self.policy) else {
                dropped += 1;
                continue;
            };
            let claim = OriginClaim {
                origin: info.origin.clone(),
                source_id: record.source_id.clone(),
                tier: info.tier,
                trust: info.trust,
                automated: info.automated,
                retrieved_at: record.retrieved_at,
                value: record.value.clone(),
                normalized,
            };
            let replace = by_origin
                .get(&info.origin)
                .map_or(true, |existing| prefer(&claim, existing));
            if replace {
                by_origin.insert(info.origin, claim);
            }
        }

        (by_origin.into_values().collect(), dropped)
    }

    fn discrepancy(&self, entity_id: &str, field: &str, groups: &[ValueGroup]) -> Discrepancy {
        let threshold = self.policy.thresholds.near_duplicate_threshold;

        let mut all_near_duplicates = true;
        for (i, a) in groups.iter().enumerate() {
            for b in &groups[i + 1..] {
                let contradictory = a.normalized.is_quantitative()
                    || b.normalized.is_quantitative()
                    || similarity(&a.normalized, &b.normalized) < threshold;
                if contradictory {
                    all_near_duplicates = false;
                }
            }
        }

        let severity = if all_near_duplicates {
            DiscrepancySeverity::Informational
        } else {
            DiscrepancySeverity::Critical
        };

        Discrepancy {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            conflicting_values: groups
                .iter()
                .map(|g| ConflictingValue {
                    value: g.value.clone(),
                    normalized: g.key.clone(),
                    sources: g.source_ids(),
                })
                .collect(),
            severity,
            status: DiscrepancyStatus::Open,
        }
    }

    fn agreement_confidence(&self, groups: &[ValueGroup]) -> f64 {
        match groups {
            [] => 0.0,
            [only] => {
                let thresholds = &self.policy.thresholds;
                if only.support() == 1 && only.best_trust() < thresholds.low_trust_cutoff {
                    1.0 - thresholds.sole_low_trust_penalty
                } else {
                    1.0
                }
            }
            [winner, ..] => {
                let total: usize = groups.iter().map(ValueGroup::support).sum();
                winner.support() as f64 / total as f64
            }
        }
    }
}

fn newer(candidate: &SourceRecord, current: &SourceRecord) -> bool {
    (candidate.retrieved_at, candidate.record_id) > (current.retrieved_at, current.record_id)
}

/// True when `candidate` should represent its origin instead of `existing`
fn prefer(candidate: &OriginClaim, existing: &OriginClaim) -> bool {
    let candidate_is_origin = candidate.source_id == candidate.origin;
    let existing_is_origin = existing.source_id == existing.origin;
    match (candidate_is_origin, existing_is_origin) {
        (true, false) => true,
        (false, true) => false,
        _ => (candidate.retrieved_at, &candidate.source_id) > (existing.retrieved_at, &existing.source_id),
    }
}

fn group_claims(claims: Vec<OriginClaim>) -> Vec<ValueGroup> {
    let mut grouped: BTreeMap<String, Vec<OriginClaim>> = BTreeMap::new();
    for claim in claims {
        grouped
            .entry(claim.normalized.key.clone())
            .or_default()
            .push(claim);
    }

    grouped
        .into_iter()
        .filter_map(|(key, mut members)| {
            members.sort_by(|a, b| {
                b.trust
                    .total_cmp(&a.trust)
                    .then_with(|| a.source_id.cmp(&b.source_id))
            });
            let first = members.first()?;
            Some(ValueGroup {
                key,
                normalized: first.normalized.clone(),
                value: first.value.clone(),
                best_rank: usize::MAX,
                members,
            })
        })
        .collect()
}

/// Order groups best first: hierarchy position, support, summed trust, key
pub fn rank_groups(mut groups: Vec<ValueGroup>, category: &CategoryPolicy) -> Vec<ValueGroup> {
    for group in &mut groups {
        group.best_rank = group
            .members
            .iter()
            .map(|m| category.rank(m.tier))
            .min()
            .unwrap_or(usize::MAX);
    }
    groups.sort_by(compare_groups);
    groups
}

fn compare_groups(a: &ValueGroup, b: &ValueGroup) -> Ordering {
    a.best_rank
        .cmp(&b.best_rank)
        .then_with(|| b.support().cmp(&a.support()))
        .then_with(|| b.summed_trust().total_cmp(&a.summed_trust()))
        .then_with(|| a.key.cmp(&b.key))
}
