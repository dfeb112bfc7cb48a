// Governance rules - named, versioned, data-defined checks
//
// Rules are declared in the policy file and evaluated in order. Each
// evaluation yields pass/fail with a human-readable explanation; findings
// that matter beyond the rule (missing or stale fields) are reported as
// structured RunOutcomes.

use crate::config::ResolutionPolicy;
use crate::governance::decay::{decayed_confidence, past_window};
use crate::types::{
    ConsensusDecision, Discrepancy, DiscrepancySeverity, DiscrepancyStatus, EntityKind,
    FieldValue, ResolvedValue, RuleOutcome, RuleSeverity, RunOutcome, TrustTier,
};
use crate::validators::normalize::normalize_text;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named governance rule as declared in the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRule {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    pub severity: RuleSeverity,
    #[serde(default)]
    pub description: String,
    /// Entity kinds the rule applies to; empty means all
    #[serde(default)]
    pub applies_to: Vec<EntityKind>,
    pub check: RuleCheck,
}

fn default_version() -> u32 {
    1
}

impl GovernanceRule {
    pub fn applies_to(&self, kind: EntityKind) -> bool {
        self.applies_to.is_empty() || self.applies_to.contains(&kind)
    }

    /// Freshness failures re-queue an entity instead of blocking it
    pub fn is_freshness(&self) -> bool {
        matches!(self.check, RuleCheck::Freshness { .. })
    }
}

/// Data-defined check variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCheck {
    RequiredFields {
        fields: Vec<String>,
    },
    MinConfidence {
        fields: Vec<String>,
        min: f64,
    },
    SourceTierMinimum {
        fields: Vec<String>,
        min_tier: TrustTier,
    },
    /// Empty `fields` covers every approved field
    Freshness {
        #[serde(default)]
        fields: Vec<String>,
    },
    AgeRatingConsistency {
        rating_field: String,
        restricted_rating: String,
        trigger_field: String,
        trigger_terms: Vec<String>,
    },
    AllowedValues {
        field: String,
        values: Vec<String>,
    },
    ForbiddenTerms {
        fields: Vec<String>,
        terms: Vec<String>,
    },
    NoCriticalDiscrepancy {},
}

impl RuleCheck {
    /// Structural validation performed at policy load
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RuleCheck::RequiredFields { fields }
            | RuleCheck::SourceTierMinimum { fields, .. }
            | RuleCheck::ForbiddenTerms { fields, .. }
                if fields.is_empty() =>
            {
                Err("check needs at least one field".to_string())
            }
            RuleCheck::MinConfidence { fields, min } => {
                if fields.is_empty() {
                    Err("check needs at least one field".to_string())
                } else if !(0.0..=1.0).contains(min) {
                    Err(format!("min {} outside [0, 1]", min))
                } else {
                    Ok(())
                }
            }
            RuleCheck::ForbiddenTerms { terms, .. } if terms.is_empty() => {
                Err("forbidden_terms needs at least one term".to_string())
            }
            RuleCheck::AllowedValues { values, .. } if values.is_empty() => {
                Err("allowed_values needs at least one value".to_string())
            }
            RuleCheck::AgeRatingConsistency { trigger_terms, .. } if trigger_terms.is_empty() => {
                Err("age_rating_consistency needs at least one trigger term".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Everything a rule may look at for one entity
pub struct EntitySnapshot<'a> {
    pub entity_id: &'a str,
    pub entity_kind: EntityKind,
    pub resolved: &'a BTreeMap<String, ResolvedValue>,
    pub decisions: &'a BTreeMap<String, ConsensusDecision>,
    pub discrepancies: &'a [Discrepancy],
    pub as_of: DateTime<Utc>,
}

impl EntitySnapshot<'_> {
    fn decayed(&self, policy: &ResolutionPolicy, value: &ResolvedValue) -> f64 {
        decayed_confidence(
            value.confidence_score,
            value.observed_at,
            self.as_of,
            &policy.category_for(&value.field_name),
        )
    }

    fn is_approved(&self, field: &str) -> bool {
        self.decisions
            .get(field)
            .is_some_and(ConsensusDecision::is_approved)
    }
}

/// Result of evaluating one rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub outcome: RuleOutcome,
    pub findings: Vec<RunOutcome>,
}

impl GovernanceRule {
    pub fn evaluate(&self, snapshot: &EntitySnapshot<'_>, policy: &ResolutionPolicy) -> RuleEvaluation {
        let (failures, findings) = self.check.run(snapshot, policy);
        let passed = failures.is_empty();
        let explanation = if passed {
            format!("{}: passed", self.name)
        } else {
            format!("{}: {}", self.name, failures.join("; "))
        };

        RuleEvaluation {
            outcome: RuleOutcome {
                rule: self.name.clone(),
                version: self.version,
                severity: self.severity,
                passed,
                explanation,
            },
            findings,
        }
    }
}

impl RuleCheck {
    /// Failure messages plus structured findings
    fn run(&self, snapshot: &EntitySnapshot<'_>, policy: &ResolutionPolicy) -> (Vec<String>, Vec<RunOutcome>) {
        let mut failures = Vec::new();
        let mut findings = Vec::new();

        match self {
            RuleCheck::RequiredFields { fields } => {
                for field in fields {
                    if !snapshot.resolved.contains_key(field) {
                        failures.push(format!("{} has no value from any source", field));
                        findings.push(RunOutcome::InsufficientData {
                            field: field.clone(),
                        });
                    }
                }
            }
            RuleCheck::MinConfidence { fields, min } => {
                for value in fields.iter().filter_map(|f| snapshot.resolved.get(f)) {
                    let decayed = snapshot.decayed(policy, value);
                    if decayed < *min {
                        failures.push(format!(
                            "{} confidence {:.2} below {:.2}",
                            value.field_name, decayed, min
                        ));
                    }
                }
            }
            RuleCheck::SourceTierMinimum { fields, min_tier } => {
                for value in fields.iter().filter_map(|f| snapshot.resolved.get(f)) {
                    if !value.has_source_at_or_above(*min_tier) {
                        failures.push(format!(
                            "{} has no {} (or higher) source",
                            value.field_name, min_tier
                        ));
                    }
                }
            }
            RuleCheck::Freshness { fields } => {
                let threshold = policy.thresholds.auto_approve_threshold;
                let candidates: Vec<&ResolvedValue> = if fields.is_empty() {
                    snapshot.resolved.values().collect()
                } else {
                    fields.iter().filter_map(|f| snapshot.resolved.get(f)).collect()
                };
                for value in candidates {
                    if !snapshot.is_approved(&value.field_name) {
                        continue;
                    }
                    let category = policy.category_for(&value.field_name);
                    if !past_window(value.observed_at, snapshot.as_of, &category) {
                        continue;
                    }
                    let decayed = snapshot.decayed(policy, value);
                    if decayed < threshold {
                        failures.push(format!(
                            "{} decayed to {:.2} since {}",
                            value.field_name,
                            decayed,
                            value.observed_at.format("%Y-%m-%d")
                        ));
                        findings.push(RunOutcome::StaleData {
                            field: value.field_name.clone(),
                            decayed_confidence: decayed,
                        });
                    }
                }
            }
            RuleCheck::AgeRatingConsistency {
                rating_field,
                restricted_rating,
                trigger_field,
                trigger_terms,
            } => {
                if let Some(trigger) = snapshot.resolved.get(trigger_field) {
                    let matched: Vec<&String> = trigger_terms
                        .iter()
                        .filter(|term| contains_term(&trigger.value, term))
                        .collect();
                    if let Some(term) = matched.first() {
                        let rating = snapshot
                            .resolved
                            .get(rating_field)
                            .map(|r| normalize_text(&r.value.to_string()));
                        if rating.as_deref() != Some(normalize_text(restricted_rating).as_str()) {
                            failures.push(format!(
                                "{} mentions '{}' but {} is {}",
                                trigger_field,
                                term,
                                rating_field,
                                rating.unwrap_or_else(|| "missing".to_string())
                            ));
                        }
                    }
                }
            }
            RuleCheck::AllowedValues { field, values } => {
                if let Some(value) = snapshot.resolved.get(field) {
                    let actual = normalize_text(&value.value.to_string());
                    if !values.iter().any(|v| normalize_text(v) == actual) {
                        failures.push(format!("{} value '{}' is not allowed", field, value.value));
                    }
                }
            }
            RuleCheck::ForbiddenTerms { fields, terms } => {
                for value in fields.iter().filter_map(|f| snapshot.resolved.get(f)) {
                    for term in terms {
                        if contains_term(&value.value, term) {
                            failures.push(format!("{} contains '{}'", value.field_name, term));
                        }
                    }
                }
            }
            RuleCheck::NoCriticalDiscrepancy {} => {
                for discrepancy in snapshot.discrepancies {
                    if discrepancy.severity == DiscrepancySeverity::Critical
                        && discrepancy.status != DiscrepancyStatus::Consumed
                    {
                        failures.push(format!(
                            "{} has {} conflicting values awaiting review",
                            discrepancy.field,
                            discrepancy.conflicting_values.len()
                        ));
                    }
                }
            }
        }

        (failures, findings)
    }
}

/// Whole-word, normalized containment of `term` in any item of `value`
fn contains_term(value: &FieldValue, term: &str) -> bool {
    let needle = format!(" {} ", normalize_text(term));
    if needle.trim().is_empty() {
        return false;
    }
    value
        .as_items()
        .iter()
        .any(|item| format!(" {} ", normalize_text(item)).contains(&needle))
}
