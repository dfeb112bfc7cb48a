// Consensus Engine - the publish gate
//
// No FACT field is published without an explicit decision from here.
// Approval always names its basis so the audit trail can explain it.

use crate::config::ResolutionPolicy;
use crate::fusion::conflict_resolver::{editor_name, OpinionResolution, Resolution};
use crate::types::{ApprovalBasis, ConsensusDecision};

pub struct ConsensusEngine<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> ConsensusEngine<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        Self { policy }
    }

    /// Decide a FACT field
    ///
    /// Approved when the winning value has enough independent origins and is
    /// not a tie, or when it is backed by a top-tier source and its
    /// confidence reaches the approval threshold. A blend over contradicting
    /// claims is always reviewed.
    pub fn decide_fact(&self, resolution: &Resolution) -> ConsensusDecision {
        let thresholds = &self.policy.thresholds;
        let confidence = resolution.value.confidence_score;

        if resolution.is_tie() {
            return ConsensusDecision::QueueForReview {
                reason: format!(
                    "tie between equally supported values (confidence {:.2})",
                    confidence
                ),
            };
        }

        if resolution.contested {
            return ConsensusDecision::QueueForReview {
                reason: format!(
                    "blend over contradicting claims ({} of {} sources agree, confidence {:.2})",
                    resolution.winner_support,
                    resolution.value.contributing_sources.len(),
                    confidence
                ),
            };
        }

        if resolution.winner_support >= thresholds.min_agreeing_sources {
            return ConsensusDecision::AutoApprove {
                basis: ApprovalBasis::IndependentAgreement {
                    sources: resolution.winner_support,
                },
            };
        }

        if let Some(source_id) = &resolution.authoritative_source {
            if confidence >= thresholds.auto_approve_threshold {
                if source_id.starts_with("editorial:") {
                    return ConsensusDecision::AutoApprove {
                        basis: ApprovalBasis::HumanAuthored {
                            editor: editor_name(source_id),
                        },
                    };
                }
                return ConsensusDecision::AutoApprove {
                    basis: ApprovalBasis::AuthoritativeSource {
                        source_id: source_id.clone(),
                    },
                };
            }
        }

        ConsensusDecision::QueueForReview {
            reason: format!(
                "{} of {} required independent sources, confidence {:.2} below {:.2}",
                resolution.winner_support,
                thresholds.min_agreeing_sources,
                confidence,
                thresholds.auto_approve_threshold
            ),
        }
    }

    /// Decide an OPINION field: only human authorship approves
    pub fn decide_opinion(&self, opinion: &OpinionResolution) -> Option<ConsensusDecision> {
        match (&opinion.value, &opinion.editor) {
            (Some(_), Some(editor)) => Some(ConsensusDecision::AutoApprove {
                basis: ApprovalBasis::HumanAuthored {
                    editor: editor.clone(),
                },
            }),
            _ if opinion.automated_claims > 0 => Some(ConsensusDecision::QueueForReview {
                reason: format!(
                    "opinion claimed by {} automated source(s) needs human authorship",
                    opinion.automated_claims
                ),
            }),
            _ => None,
        }
    }

    /// Decide a DERIVED field from the decisions of its inputs
    pub fn decide_derived(&self, unapproved_inputs: &[String]) -> ConsensusDecision {
        if unapproved_inputs.is_empty() {
            ConsensusDecision::AutoApprove {
                basis: ApprovalBasis::Derived,
            }
        } else {
            ConsensusDecision::QueueForReview {
                reason: format!("inputs not approved: {}", unapproved_inputs.join(", ")),
            }
        }
    }
}
