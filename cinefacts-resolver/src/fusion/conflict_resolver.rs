// Conflict Resolution Engine - one ResolvedValue per (entity, field)
//
// FACT fields are resolved from a FieldAssessment using the field category's
// trust hierarchy, or by weighted blending when the field declares blend
// weights. A human-authored or top-tier claim on a blended field takes the
// hierarchy path instead. OPINION fields only take values from human-authored
// records.
//
// Confidence is a pure function of the contributing claims and the policy.

use crate::config::ResolutionPolicy;
use crate::fusion::digest::InputsDigest;
use crate::types::{
    ContributingSource, FieldValue, ResolutionMethod, ResolvedValue, SourceRecord, TrustTier,
};
use crate::validators::cross_validator::{FieldAssessment, OriginClaim, ValueGroup};
use crate::validators::normalize::round_to;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::debug;

/// A resolved FACT value plus what the consensus engine needs to judge it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: ResolvedValue,
    /// Independent origins backing the winning value. For a blend, the
    /// largest group of origins that agree with each other.
    pub winner_support: usize,
    /// A blend computed over critically contradicting claims
    pub contested: bool,
    /// Top-tier source backing the winning value, if any
    pub authoritative_source: Option<String>,
    pub notes: Vec<String>,
}

impl Resolution {
    pub fn is_tie(&self) -> bool {
        self.value.resolution_method == ResolutionMethod::TieUnresolved
    }
}

/// Result of resolving an OPINION field
#[derive(Debug, Clone, PartialEq)]
pub struct OpinionResolution {
    pub value: Option<ResolvedValue>,
    /// Editor behind the published value
    pub editor: Option<String>,
    /// Latest automated claim, shown to reviewers when nothing is human-authored
    pub automated_candidate: Option<FieldValue>,
    pub automated_claims: usize,
}

pub struct ConflictResolver<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        Self { policy }
    }

    /// Resolve a FACT field. `None` when no source made a claim.
    pub fn resolve_fact(
        &self,
        assessment: &FieldAssessment,
        resolved_at: DateTime<Utc>,
    ) -> Option<Resolution> {
        let winner = assessment.groups.first()?;
        let mut notes = Vec::new();

        if let Some(resolution) = self.try_blend(assessment, resolved_at, &mut notes) {
            return Some(resolution);
        }

        let thresholds = &self.policy.thresholds;
        let tie_cap = self.policy.tie_cap();
        let base = winner.best_trust();

        let (method, confidence) = match assessment.groups.get(1) {
            None if winner.support() == 1 => (ResolutionMethod::SingleSource, base),
            None => {
                let bonus = thresholds.agreement_bonus_per_source * (winner.support() - 1) as f64;
                (ResolutionMethod::Agreement, (base + bonus).min(1.0))
            }
            Some(runner_up) if winner.best_rank < runner_up.best_rank => {
                let runner_trust = runner_up.best_trust();
                let gap = base - runner_trust;
                let gap_norm = (gap / thresholds.full_gap).clamp(0.0, 1.0);
                let mut confidence =
                    base * (thresholds.min_factor + (1.0 - thresholds.min_factor) * gap_norm);
                if gap < thresholds.near_tie_gap {
                    confidence = confidence.min(tie_cap);
                }
                notes.push(format!(
                    "{} outranks {} in the trust hierarchy",
                    describe_group(winner),
                    describe_group(runner_up)
                ));
                (ResolutionMethod::TrustHierarchy, confidence)
            }
            Some(runner_up) if winner.support() > runner_up.support() => {
                let share = winner.support() as f64
                    / (winner.support() + runner_up.support()) as f64;
                let confidence = (base + (tie_cap - base) * (2.0 * share - 1.0)).min(tie_cap);
                notes.push(format!(
                    "majority {} of {} independent origins",
                    winner.support(),
                    winner.support() + runner_up.support()
                ));
                (ResolutionMethod::Majority, confidence)
            }
            Some(runner_up) => {
                notes.push(format!(
                    "unresolved tie between {} and {}",
                    describe_group(winner),
                    describe_group(runner_up)
                ));
                (
                    ResolutionMethod::TieUnresolved,
                    base.min(tie_cap) * thresholds.tie_confidence_factor,
                )
            }
        };

        let contributors: Vec<&OriginClaim> = winner.members.iter().collect();
        let authoritative_source = self.authoritative_source(&assessment.field, winner);

        debug!(
            entity_id = %assessment.entity_id,
            field = %assessment.field,
            method = %method,
            confidence,
            "Resolved FACT field"
        );

        Some(Resolution {
            value: self.build_value(
                assessment,
                winner.value.clone(),
                confidence,
                method,
                &contributors,
                resolved_at,
            ),
            winner_support: winner.support(),
            contested: false,
            authoritative_source,
            notes,
        })
    }

    /// Weighted average across sources with declared blend weights
    fn try_blend(
        &self,
        assessment: &FieldAssessment,
        resolved_at: DateTime<Utc>,
        notes: &mut Vec<String>,
    ) -> Option<Resolution> {
        let field_policy = self.policy.field(&assessment.field)?;
        if field_policy.blend.is_empty() {
            return None;
        }

        let top_tier = self.policy.category_for(&assessment.field).top_tier();
        if let Some(override_claim) = assessment
            .claims()
            .find(|c| !c.automated || Some(c.tier) == top_tier)
        {
            notes.push(format!(
                "blend skipped: {} overrides automated sources",
                override_claim.source_id
            ));
            return None;
        }

        let mut weighted: Vec<(&OriginClaim, &str, f64, f64)> = Vec::new();
        for claim in assessment.claims() {
            let Some((key, weight)) = self.policy.blend_entry(&assessment.field, &claim.source_id)
            else {
                continue;
            };
            if weight <= 0.0 {
                continue;
            }
            match claim.value.as_f64() {
                Some(number) => weighted.push((claim, key, weight, number)),
                None => notes.push(format!(
                    "dropped non-numeric claim {:?} from {}",
                    claim.value.to_string(),
                    claim.source_id
                )),
            }
        }

        // a pattern weight is shared by every source it matches
        let mut per_key: BTreeMap<&str, usize> = BTreeMap::new();
        for (_, key, _, _) in &weighted {
            *per_key.entry(*key).or_default() += 1;
        }
        let mut blended: Vec<(&OriginClaim, f64, f64)> = weighted
            .iter()
            .map(|(claim, key, weight, number)| {
                let sharing = per_key.get(key).copied().unwrap_or(1).max(1);
                (*claim, weight / sharing as f64, *number)
            })
            .collect();

        if blended.len() < 2 {
            return None;
        }
        blended.sort_by(|a, b| a.0.source_id.cmp(&b.0.source_id));

        let coverage: f64 = blended.iter().map(|(_, w, _)| w).sum();
        let weighted_value: f64 = blended.iter().map(|(_, w, v)| w * v).sum::<f64>() / coverage;
        let weighted_trust: f64 =
            blended.iter().map(|(c, w, _)| w * c.trust).sum::<f64>() / coverage;

        let precision = self.policy.precision_for(&assessment.field);
        let value = FieldValue::Number(round_to(weighted_value, precision));
        let confidence = (weighted_trust * coverage.min(1.0)).clamp(0.0, 1.0);

        notes.push(format!(
            "blended {} sources covering {:.0}% of declared weight",
            blended.len(),
            coverage * 100.0
        ));

        let contributors: Vec<&OriginClaim> = blended.iter().map(|(c, _, _)| *c).collect();
        let largest_agreeing = assessment
            .groups
            .iter()
            .map(|group| {
                group
                    .members
                    .iter()
                    .filter(|m| contributors.iter().any(|c| c.origin == m.origin))
                    .count()
            })
            .max()
            .unwrap_or(0);
        let contested = assessment.has_critical_discrepancy();
        if contested {
            notes.push("blended claims contradict each other".to_string());
        }

        debug!(
            entity_id = %assessment.entity_id,
            field = %assessment.field,
            sources = blended.len(),
            confidence,
            "Blended numeric field"
        );

        Some(Resolution {
            value: self.build_value(
                assessment,
                value,
                confidence,
                ResolutionMethod::WeightedBlend,
                &contributors,
                resolved_at,
            ),
            winner_support: largest_agreeing,
            contested,
            authoritative_source: None,
            notes: std::mem::take(notes),
        })
    }

    fn authoritative_source(&self, field: &str, winner: &ValueGroup) -> Option<String> {
        let top = self.policy.category_for(field).top_tier()?;
        winner
            .members
            .iter()
            .find(|m| m.tier == top)
            .map(|m| m.source_id.clone())
    }

    fn build_value(
        &self,
        assessment: &FieldAssessment,
        value: FieldValue,
        confidence: f64,
        method: ResolutionMethod,
        contributors: &[&OriginClaim],
        resolved_at: DateTime<Utc>,
    ) -> ResolvedValue {
        let mut digest = InputsDigest::new(&self.policy.version, &assessment.field);
        for claim in assessment.claims() {
            digest.push(&claim.source_id, claim.retrieved_at, &claim.value);
        }

        let mut contributing_sources: Vec<ContributingSource> = contributors
            .iter()
            .map(|c| ContributingSource {
                source_id: c.source_id.clone(),
                tier: c.tier,
                trust: c.trust,
                retrieved_at: c.retrieved_at,
            })
            .collect();
        contributing_sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        let observed_at = contributors
            .iter()
            .map(|c| c.retrieved_at)
            .max()
            .unwrap_or(resolved_at);

        ResolvedValue {
            entity_id: assessment.entity_id.clone(),
            field_name: assessment.field.clone(),
            value,
            confidence_score: confidence.clamp(0.0, 1.0),
            contributing_sources,
            resolution_method: method,
            resolved_at,
            observed_at,
            inputs_digest: digest.finish(),
        }
    }

    /// Resolve an OPINION field from human-authored records only
    pub fn resolve_opinion(
        &self,
        entity_id: &str,
        field: &str,
        records: &[&SourceRecord],
        resolved_at: DateTime<Utc>,
    ) -> OpinionResolution {
        let mut human: Option<(&SourceRecord, f64, TrustTier)> = None;
        let mut automated: Option<&SourceRecord> = None;
        let mut automated_claims = 0;
        let mut digest = InputsDigest::new(&self.policy.version, field);

        for &record in records {
            if record.value.is_no_claim() {
                continue;
            }
            let info = self
                .policy
                .source_info(&record.source_id, record.source_trust_tier);
            if info.automated {
                automated_claims += 1;
                if automated.map_or(true, |a| later(record, a)) {
                    automated = Some(record);
                }
                continue;
            }
            digest.push(&record.source_id, record.retrieved_at, &record.value);
            if human.map_or(true, |(h, _, _)| later(record, h)) {
                human = Some((record, info.trust, info.tier));
            }
        }

        let Some((record, trust, tier)) = human else {
            return OpinionResolution {
                value: None,
                editor: None,
                automated_candidate: automated.map(|r| r.value.clone()),
                automated_claims,
            };
        };

        OpinionResolution {
            value: Some(ResolvedValue {
                entity_id: entity_id.to_string(),
                field_name: field.to_string(),
                value: record.value.clone(),
                confidence_score: trust,
                contributing_sources: vec![ContributingSource {
                    source_id: record.source_id.clone(),
                    tier,
                    trust,
                    retrieved_at: record.retrieved_at,
                }],
                resolution_method: ResolutionMethod::Editorial,
                resolved_at,
                observed_at: record.retrieved_at,
                inputs_digest: digest.finish(),
            }),
            editor: Some(editor_name(&record.source_id)),
            automated_candidate: automated.map(|r| r.value.clone()),
            automated_claims,
        }
    }
}

fn later(candidate: &SourceRecord, current: &SourceRecord) -> bool {
    (candidate.retrieved_at, &candidate.source_id) > (current.retrieved_at, &current.source_id)
}

/// Editor name from an `editorial:<editor>` source id
pub fn editor_name(source_id: &str) -> String {
    source_id
        .strip_prefix("editorial:")
        .unwrap_or(source_id)
        .to_string()
}

fn describe_group(group: &ValueGroup) -> String {
    format!("'{}' ({})", group.value, group.source_ids().join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use crate::validators::CrossValidator;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn record(field: &str, source: &str, tier: TrustTier, value: FieldValue) -> SourceRecord {
        SourceRecord {
            record_id: Uuid::new_v4(),
            entity_id: "movie-eega".to_string(),
            entity_kind: EntityKind::Movie,
            field_name: field.to_string(),
            value,
            source_id: source.to_string(),
            retrieved_at: now(),
            source_trust_tier: tier,
        }
    }

    fn resolve(policy: &ResolutionPolicy, field: &str, records: &[SourceRecord]) -> Option<Resolution> {
        let refs: Vec<&SourceRecord> = records.iter().collect();
        let assessment = CrossValidator::new(policy).assess("movie-eega", field, &refs);
        ConflictResolver::new(policy).resolve_fact(&assessment, now())
    }

    #[test]
    fn test_no_claims_no_value() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![record("release_year", "tmdb", TrustTier::Aggregator, FieldValue::Null)];
        assert!(resolve(&policy, "release_year", &records).is_none());
    }

    #[test]
    fn test_single_source_confidence_is_source_trust() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![record("release_year", "tmdb", TrustTier::Aggregator, FieldValue::Integer(2012))];
        let resolution = resolve(&policy, "release_year", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::SingleSource);
        assert_eq!(resolution.value.confidence_score, 0.8);
        assert_eq!(resolution.value.observed_at, now());
    }

    #[test]
    fn test_agreement_bonus() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("release_year", "tmdb", TrustTier::Aggregator, FieldValue::Integer(2012)),
            record("release_year", "imdb", TrustTier::Aggregator, FieldValue::Integer(2012)),
        ];
        let resolution = resolve(&policy, "release_year", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::Agreement);
        assert!((resolution.value.confidence_score - 0.85).abs() < 1e-12);
        assert_eq!(resolution.winner_support, 2);
        assert_eq!(resolution.value.contributing_sources.len(), 2);
    }

    #[test]
    fn test_trust_hierarchy_winner() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("release_year", "cbfc", TrustTier::Official, FieldValue::Integer(2012)),
            record("release_year", "letterboxd", TrustTier::Community, FieldValue::Integer(2011)),
        ];
        let resolution = resolve(&policy, "release_year", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::TrustHierarchy);
        assert_eq!(resolution.value.value, FieldValue::Integer(2012));
        // gap 0.4 of full 0.5: 0.9 * (0.6 + 0.4 * 0.8)
        assert!((resolution.value.confidence_score - 0.9 * 0.92).abs() < 1e-12);
        assert!(resolution.notes[0].contains("outranks"));
    }

    #[test]
    fn test_same_tier_majority_below_threshold() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("release_year", "tmdb", TrustTier::Aggregator, FieldValue::Integer(2010)),
            record("release_year", "imdb", TrustTier::Aggregator, FieldValue::Integer(2010)),
            record("release_year", "omdb", TrustTier::Aggregator, FieldValue::Integer(2011)),
        ];
        let resolution = resolve(&policy, "release_year", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::Majority);
        assert_eq!(resolution.value.value, FieldValue::Integer(2010));
        assert!(resolution.value.confidence_score < policy.thresholds.auto_approve_threshold);
        assert!(resolution.value.confidence_score <= policy.tie_cap());
        // tmdb alone would give 0.8
        assert!(resolution.value.confidence_score > 0.8);
    }

    #[test]
    fn test_same_tier_tie_is_unresolved() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("release_year", "imdb", TrustTier::Aggregator, FieldValue::Integer(2010)),
            record("release_year", "omdb", TrustTier::Aggregator, FieldValue::Integer(2011)),
        ];
        let resolution = resolve(&policy, "release_year", &records).unwrap();
        assert!(resolution.is_tie());
        assert!((resolution.value.confidence_score - 0.35).abs() < 1e-12);
    }

    #[test]
    fn test_weighted_blend_scenario() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(7.2)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Number(8.5)),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::WeightedBlend);
        assert_eq!(resolution.value.value, FieldValue::Number(7.59));
        assert!((resolution.value.confidence_score - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_pattern_weight_shared_by_matching_sources() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(7.0)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Number(8.0)),
            record("rating", "regional:idlebrain", TrustTier::Community, FieldValue::Number(9.0)),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        // 0.7 * 7.0 + 0.15 * 8.0 + 0.15 * 9.0
        assert_eq!(resolution.value.value, FieldValue::Number(7.45));
        assert!((resolution.value.confidence_score - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_contradicting_blend_is_contested() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(2.0)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Number(9.5)),
            record("rating", "regional:idlebrain", TrustTier::Community, FieldValue::Number(5.0)),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::WeightedBlend);
        assert_eq!(resolution.winner_support, 1);
        assert!(resolution.contested);
        let decision = crate::fusion::ConsensusEngine::new(&policy).decide_fact(&resolution);
        assert!(!decision.is_approved());
    }

    #[test]
    fn test_agreeing_blend_counts_every_source() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(7.5)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Number(7.5)),
            record("rating", "regional:idlebrain", TrustTier::Community, FieldValue::Number(7.5)),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        assert_eq!(resolution.winner_support, 3);
        assert!(!resolution.contested);
    }

    #[test]
    fn test_editorial_claim_overrides_blend() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(7.2)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Number(8.5)),
            record("rating", "editorial:ravi", TrustTier::Editorial, FieldValue::Number(6.0)),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        assert_eq!(resolution.value.resolution_method, ResolutionMethod::TrustHierarchy);
        assert_eq!(resolution.value.value, FieldValue::Number(6.0));
        assert_eq!(resolution.authoritative_source.as_deref(), Some("editorial:ravi"));
        assert!(resolution.notes.iter().any(|n| n.contains("blend skipped")));
    }

    #[test]
    fn test_blend_drops_non_numeric_claims() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![
            record("rating", "tmdb", TrustTier::Aggregator, FieldValue::Number(7.2)),
            record("rating", "regional:greatandhra", TrustTier::Community, FieldValue::Text("superb".into())),
        ];
        let resolution = resolve(&policy, "rating", &records).unwrap();
        // one numeric claim left: hierarchy resolution applies instead
        assert_ne!(resolution.value.resolution_method, ResolutionMethod::WeightedBlend);
        assert!(resolution.notes.iter().any(|n| n.contains("non-numeric")));
    }

    #[test]
    fn test_opinion_requires_human_author() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let resolver = ConflictResolver::new(&policy);

        let automated = record("review_verdict", "tmdb", TrustTier::Aggregator, FieldValue::Text("Must watch".into()));
        let refs = vec![&automated];
        let opinion = resolver.resolve_opinion("movie-eega", "review_verdict", &refs, now());
        assert!(opinion.value.is_none());
        assert_eq!(opinion.automated_claims, 1);
        assert_eq!(opinion.automated_candidate, Some(FieldValue::Text("Must watch".into())));

        let human = record("review_verdict", "editorial:lakshmi", TrustTier::Editorial, FieldValue::Text("Inventive".into()));
        let refs = vec![&automated, &human];
        let opinion = resolver.resolve_opinion("movie-eega", "review_verdict", &refs, now());
        let value = opinion.value.unwrap();
        assert_eq!(value.resolution_method, ResolutionMethod::Editorial);
        assert_eq!(value.confidence_score, 0.95);
        assert_eq!(opinion.editor.as_deref(), Some("lakshmi"));
    }

    #[test]
    fn test_digest_stable_across_runs() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let records = vec![record("release_year", "tmdb", TrustTier::Aggregator, FieldValue::Integer(2012))];
        let a = resolve(&policy, "release_year", &records).unwrap();
        let b = resolve(&policy, "release_year", &records).unwrap();
        assert_eq!(a.value.inputs_digest, b.value.inputs_digest);
        assert_eq!(a.value.confidence_score, b.value.confidence_score);
    }
}
