//! Governance layer
//!
//! Data-defined rules, freshness decay and the explainable per-entity
//! TrustScore.

pub mod decay;
pub mod rules;
pub mod trust_score;
pub mod validator;

pub use rules::{EntitySnapshot, GovernanceRule, RuleCheck};
pub use validator::{GovernanceReport, GovernanceValidator};
