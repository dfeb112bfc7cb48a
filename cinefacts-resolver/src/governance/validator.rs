// Governance Validator - rule evaluation and entity state machine
//
// pending -> validated (all critical rules pass)
//         -> blocked   (a critical rule fails)
//         -> stale     (a freshness check fails; the pipeline re-queues)
//
// Blocked takes precedence over stale. Failures never delete data.

use crate::config::ResolutionPolicy;
use crate::governance::decay::decayed_confidence;
use crate::governance::rules::EntitySnapshot;
use crate::governance::trust_score::{explain, overall_level};
use crate::types::{EntityStatus, FieldConfidence, RuleSeverity, RunOutcome, TrustScore};
use tracing::{debug, warn};

/// Everything governance produced for one entity
#[derive(Debug, Clone, PartialEq)]
pub struct GovernanceReport {
    pub trust_score: TrustScore,
    pub status: EntityStatus,
    pub outcomes: Vec<RunOutcome>,
    /// Fields whose decayed confidence fell below the approval threshold
    pub stale_fields: Vec<(String, f64)>,
}

pub struct GovernanceValidator<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> GovernanceValidator<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        Self { policy }
    }

    pub fn evaluate(&self, snapshot: &EntitySnapshot<'_>) -> GovernanceReport {
        let mut breakdown = Vec::new();
        let mut outcomes = Vec::new();
        let mut stale_fields = Vec::new();
        let mut blocked = false;
        let mut stale = false;

        for rule in self
            .policy
            .rules
            .iter()
            .filter(|r| r.applies_to(snapshot.entity_kind))
        {
            let evaluation = rule.evaluate(snapshot, self.policy);
            let passed = evaluation.outcome.passed;

            for finding in evaluation.findings {
                if let RunOutcome::StaleData {
                    field,
                    decayed_confidence,
                } = &finding
                {
                    warn!(
                        entity_id = snapshot.entity_id,
                        field = %field,
                        decayed_confidence,
                        "Field decayed below approval threshold"
                    );
                    stale_fields.push((field.clone(), *decayed_confidence));
                }
                outcomes.push(finding);
            }

            if !passed {
                if rule.is_freshness() {
                    stale = true;
                } else if rule.severity == RuleSeverity::Critical {
                    blocked = true;
                    outcomes.push(RunOutcome::GovernanceViolation {
                        rule: rule.name.clone(),
                        explanation: evaluation.outcome.explanation.clone(),
                    });
                }
            }

            debug!(
                entity_id = snapshot.entity_id,
                rule = %rule.name,
                passed,
                "Evaluated governance rule"
            );
            breakdown.push(evaluation.outcome);
        }

        let status = if blocked {
            EntityStatus::Blocked
        } else if stale {
            EntityStatus::Stale
        } else if snapshot.resolved.is_empty() {
            EntityStatus::Pending
        } else {
            EntityStatus::Validated
        };

        let field_confidences: Vec<FieldConfidence> = snapshot
            .resolved
            .values()
            .map(|value| FieldConfidence {
                field: value.field_name.clone(),
                stored: value.confidence_score,
                decayed: decayed_confidence(
                    value.confidence_score,
                    value.observed_at,
                    snapshot.as_of,
                    &self.policy.category_for(&value.field_name),
                ),
                approved: snapshot
                    .decisions
                    .get(&value.field_name)
                    .is_some_and(|d| d.is_approved()),
            })
            .collect();

        let level = overall_level(&breakdown, &field_confidences, &self.policy.trust_levels);
        let explanation = explain(status, level, &breakdown, &field_confidences);

        GovernanceReport {
            trust_score: TrustScore {
                entity_id: snapshot.entity_id.to_string(),
                breakdown_by_rule: breakdown,
                field_confidences,
                overall_level: level,
                explanation,
                status,
                policy_version: self.policy.version.clone(),
                evaluated_at: snapshot.as_of,
            },
            status,
            outcomes,
            stale_fields,
        }
    }
}
