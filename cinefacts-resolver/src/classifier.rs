//! Claim classification
//!
//! Maps a field name to FACT, OPINION or DERIVED using the policy `[fields]`
//! table. Fields the policy does not know are treated as OPINION so nothing
//! unknown is ever auto-approved.

use crate::config::ResolutionPolicy;
use crate::types::ClaimKind;
use tracing::debug;

pub struct ClaimClassifier<'a> {
    policy: &'a ResolutionPolicy,
}

impl<'a> ClaimClassifier<'a> {
    pub fn new(policy: &'a ResolutionPolicy) -> Self {
        Self { policy }
    }

    pub fn classify(&self, field: &str) -> ClaimKind {
        match self.policy.field(field) {
            Some(declared) => declared.claim,
            None => {
                debug!(field, "Undeclared field classified as OPINION");
                ClaimKind::Opinion
            }
        }
    }

    /// True when the field is eligible for cross-source consensus
    pub fn is_consensus_eligible(&self, field: &str) -> bool {
        self.classify(field) == ClaimKind::Fact
    }
}
