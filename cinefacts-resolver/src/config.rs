//! Resolution policy
//!
//! Every tunable of the engine (source profiles, trust tiers, field semantics,
//! category hierarchies, decay windows, blend weights, aliases, thresholds and
//! governance rules) lives in one TOML document. A built-in default is
//! embedded in the binary; a policy file replaces it without code changes.
//!
//! Policies are validated at load time. An invalid policy is a configuration
//! error, never silently patched.

use crate::governance::rules::{GovernanceRule, RuleCheck};
use crate::types::{ClaimKind, TrustTier};
use crate::validators::normalize::normalize_text;
use cinefacts_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error as ThisError;
use tracing::{info, warn};

/// Embedded default policy
pub const DEFAULT_POLICY_TOML: &str = include_str!("../policy.default.toml");

/// Name of the category used for fields that do not declare one
pub const DEFAULT_CATEGORY: &str = "default";

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Policy validation failure
#[derive(Debug, ThisError, PartialEq)]
pub enum PolicyError {
    #[error("policy version must not be empty")]
    EmptyVersion,

    #[error("threshold `{name}` must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("threshold `{name}` must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("source `{source_name}`: {reason}")]
    InvalidSource { source_name: String, reason: String },

    #[error("category `{category}`: {reason}")]
    InvalidCategory { category: String, reason: String },

    #[error("field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("rule `{rule}`: {reason}")]
    InvalidRule { rule: String, reason: String },
}

impl From<PolicyError> for Error {
    fn from(err: PolicyError) -> Self {
        Error::Config(format!("invalid resolution policy: {}", err))
    }
}

// ============================================================================
// Policy document
// ============================================================================

/// Numeric knobs of the resolution and consensus engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub auto_approve_threshold: f64,
    pub min_agreeing_sources: usize,
    /// Same-tier disagreements are capped at `auto_approve_threshold - tie_margin`
    pub tie_margin: f64,
    pub tie_confidence_factor: f64,
    pub agreement_bonus_per_source: f64,
    pub min_factor: f64,
    /// Trust gap at which a hierarchy win reaches full confidence
    pub full_gap: f64,
    pub near_tie_gap: f64,
    pub near_duplicate_threshold: f64,
    pub low_trust_cutoff: f64,
    pub sole_low_trust_penalty: f64,
    pub default_precision: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.85,
            min_agreeing_sources: 3,
            tie_margin: 0.02,
            tie_confidence_factor: 0.5,
            agreement_bonus_per_source: 0.05,
            min_factor: 0.6,
            full_gap: 0.5,
            near_tie_gap: 0.05,
            near_duplicate_threshold: 0.85,
            low_trust_cutoff: 0.6,
            sole_low_trust_penalty: 0.1,
            default_precision: 2,
        }
    }
}

/// Mean-confidence bands for the overall trust level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustLevelBands {
    pub medium_min: f64,
    pub high_min: f64,
}

impl Default for TrustLevelBands {
    fn default() -> Self {
        Self {
            medium_min: 0.6,
            high_min: 0.8,
        }
    }
}

/// Declared profile of one provider
///
/// A key ending in `:*` (e.g. `regional:*`) matches every source id with
/// that prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub tier: TrustTier,
    #[serde(default)]
    pub trust: Option<f64>,
    #[serde(default = "default_automated")]
    pub automated: bool,
    /// Source this provider republishes; both count as one independent origin
    #[serde(default)]
    pub syndicates: Option<String>,
}

fn default_automated() -> bool {
    true
}

/// Effective view of a source after applying its profile
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub source_id: String,
    pub tier: TrustTier,
    pub trust: f64,
    pub automated: bool,
    /// Independent origin (the syndicated source, or the source itself)
    pub origin: String,
}

/// Trust hierarchy and freshness parameters shared by a group of fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPolicy {
    #[serde(default = "default_hierarchy")]
    pub hierarchy: Vec<TrustTier>,
    #[serde(default = "default_window")]
    pub decay_window_days: f64,
    #[serde(default = "default_half_life")]
    pub half_life_days: f64,
}

fn default_hierarchy() -> Vec<TrustTier> {
    TrustTier::ALL.to_vec()
}

fn default_window() -> f64 {
    365.0
}

fn default_half_life() -> f64 {
    365.0
}

impl Default for CategoryPolicy {
    fn default() -> Self {
        Self {
            hierarchy: default_hierarchy(),
            decay_window_days: default_window(),
            half_life_days: default_half_life(),
        }
    }
}

impl CategoryPolicy {
    /// Position of `tier` in this hierarchy; unlisted tiers rank last
    pub fn rank(&self, tier: TrustTier) -> usize {
        self.hierarchy
            .iter()
            .position(|t| *t == tier)
            .unwrap_or(self.hierarchy.len())
    }

    /// Highest tier of this hierarchy
    pub fn top_tier(&self) -> Option<TrustTier> {
        self.hierarchy.first().copied()
    }
}

/// Score band for `ratio_band` derivations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub min: f64,
    pub label: String,
}

/// Data-defined computation of a DERIVED field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    Ratio {
        numerator: String,
        denominator: String,
    },
    RatioBand {
        numerator: String,
        denominator: String,
        bands: Vec<Band>,
    },
}

impl Derivation {
    pub fn inputs(&self) -> [&str; 2] {
        match self {
            Derivation::Ratio {
                numerator,
                denominator,
            }
            | Derivation::RatioBand {
                numerator,
                denominator,
                ..
            } => [numerator.as_str(), denominator.as_str()],
        }
    }
}

/// Declared semantics of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPolicy {
    pub claim: ClaimKind,
    #[serde(default)]
    pub category: Option<String>,
    /// Blend weights keyed by source id (or `prefix:*` pattern)
    #[serde(default)]
    pub blend: BTreeMap<String, f64>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub derivation: Option<Derivation>,
}

/// The complete policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionPolicy {
    pub version: String,
    /// Reject records from sources without a profile
    #[serde(default)]
    pub strict_sources: bool,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub trust_levels: TrustLevelBands,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceProfile>,
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryPolicy>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldPolicy>,
    /// Normalized name variant to canonical normalized form
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub rules: Vec<GovernanceRule>,
}

// ============================================================================
// Loading
// ============================================================================

impl ResolutionPolicy {
    /// Parse and validate a policy document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut policy: ResolutionPolicy = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse policy: {}", e)))?;
        policy.normalize();
        policy.validate()?;
        Ok(policy)
    }

    /// The embedded default policy
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_POLICY_TOML)
    }

    /// Load a policy file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let policy = Self::from_toml_str(&content)?;
        info!(
            path = %path.display(),
            version = %policy.version,
            "Loaded resolution policy"
        );
        Ok(policy)
    }

    /// Load `path` when given and present, the built-in policy otherwise
    ///
    /// A missing file falls back to the built-in policy with a warning; a
    /// file that exists but does not validate is an error.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "Policy file not found, using built-in policy"
                );
                Self::builtin()
            }
            None => Self::builtin(),
        }
    }

    fn normalize(&mut self) {
        self.categories
            .entry(DEFAULT_CATEGORY.to_string())
            .or_default();

        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|(variant, canonical)| (normalize_text(&variant), normalize_text(&canonical)))
            .collect();

        for field in self.fields.values_mut() {
            if let Some(Derivation::RatioBand { bands, .. }) = field.derivation.as_mut() {
                bands.sort_by(|a, b| b.min.total_cmp(&a.min));
            }
        }
    }

    /// Check every structural invariant of the policy
    pub fn validate(&self) -> std::result::Result<(), PolicyError> {
        if self.version.trim().is_empty() {
            return Err(PolicyError::EmptyVersion);
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("auto_approve_threshold", t.auto_approve_threshold),
            ("tie_margin", t.tie_margin),
            ("tie_confidence_factor", t.tie_confidence_factor),
            ("agreement_bonus_per_source", t.agreement_bonus_per_source),
            ("min_factor", t.min_factor),
            ("near_tie_gap", t.near_tie_gap),
            ("near_duplicate_threshold", t.near_duplicate_threshold),
            ("low_trust_cutoff", t.low_trust_cutoff),
            ("sole_low_trust_penalty", t.sole_low_trust_penalty),
            ("medium_min", self.trust_levels.medium_min),
            ("high_min", self.trust_levels.high_min),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PolicyError::ThresholdOutOfRange { name, value });
            }
        }
        if t.full_gap <= 0.0 {
            return Err(PolicyError::NonPositive {
                name: "full_gap",
                value: t.full_gap,
            });
        }
        if t.min_agreeing_sources == 0 {
            return Err(PolicyError::NonPositive {
                name: "min_agreeing_sources",
                value: 0.0,
            });
        }
        if t.tie_margin <= 0.0 {
            return Err(PolicyError::NonPositive {
                name: "tie_margin",
                value: t.tie_margin,
            });
        }
        if t.tie_margin > t.auto_approve_threshold {
            return Err(PolicyError::ThresholdOutOfRange {
                name: "tie_margin",
                value: t.tie_margin,
            });
        }
        if self.trust_levels.medium_min > self.trust_levels.high_min {
            return Err(PolicyError::ThresholdOutOfRange {
                name: "medium_min",
                value: self.trust_levels.medium_min,
            });
        }

        for (name, profile) in &self.sources {
            if let Some(trust) = profile.trust {
                if !(0.0..=1.0).contains(&trust) {
                    return Err(PolicyError::InvalidSource {
                        source_name: name.clone(),
                        reason: format!("trust {} outside [0, 1]", trust),
                    });
                }
            }
            if let Some(origin) = &profile.syndicates {
                if origin == name {
                    return Err(PolicyError::InvalidSource {
                        source_name: name.clone(),
                        reason: "a source cannot syndicate itself".to_string(),
                    });
                }
                if !self.sources.contains_key(origin) {
                    return Err(PolicyError::InvalidSource {
                        source_name: name.clone(),
                        reason: format!("syndicates unknown source `{}`", origin),
                    });
                }
            }
        }

        for (name, category) in &self.categories {
            if category.hierarchy.is_empty() {
                return Err(PolicyError::InvalidCategory {
                    category: name.clone(),
                    reason: "hierarchy must list at least one tier".to_string(),
                });
            }
            let distinct: BTreeSet<_> = category.hierarchy.iter().collect();
            if distinct.len() != category.hierarchy.len() {
                return Err(PolicyError::InvalidCategory {
                    category: name.clone(),
                    reason: "hierarchy lists a tier twice".to_string(),
                });
            }
            if category.half_life_days <= 0.0 {
                return Err(PolicyError::InvalidCategory {
                    category: name.clone(),
                    reason: format!("half_life_days must be positive, got {}", category.half_life_days),
                });
            }
            if category.decay_window_days < 0.0 {
                return Err(PolicyError::InvalidCategory {
                    category: name.clone(),
                    reason: "decay_window_days must not be negative".to_string(),
                });
            }
        }

        for (name, field) in &self.fields {
            self.validate_field(name, field)?;
        }

        let mut rule_names = BTreeSet::new();
        for rule in &self.rules {
            if rule.name.trim().is_empty() {
                return Err(PolicyError::InvalidRule {
                    rule: rule.name.clone(),
                    reason: "rule name must not be empty".to_string(),
                });
            }
            if !rule_names.insert(rule.name.as_str()) {
                return Err(PolicyError::InvalidRule {
                    rule: rule.name.clone(),
                    reason: "duplicate rule name".to_string(),
                });
            }
            rule.check.validate().map_err(|reason| PolicyError::InvalidRule {
                rule: rule.name.clone(),
                reason,
            })?;
        }

        Ok(())
    }

    fn validate_field(&self, name: &str, field: &FieldPolicy) -> std::result::Result<(), PolicyError> {
        let invalid = |reason: String| PolicyError::InvalidField {
            field: name.to_string(),
            reason,
        };

        if let Some(category) = &field.category {
            if !self.categories.contains_key(category) {
                return Err(invalid(format!("unknown category `{}`", category)));
            }
        }

        if !field.blend.is_empty() {
            if field.blend.values().any(|w| *w < 0.0) {
                return Err(invalid("blend weights must not be negative".to_string()));
            }
            let total: f64 = field.blend.values().sum();
            if (total - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(invalid(format!("blend weights sum to {}, expected 1.0", total)));
            }
        }

        match (field.claim, &field.derivation) {
            (ClaimKind::Derived, None) => {
                Err(invalid("derived field needs a derivation".to_string()))
            }
            (ClaimKind::Derived, Some(derivation)) => {
                for input in derivation.inputs() {
                    match self.fields.get(input) {
                        Some(f) if f.claim != ClaimKind::Derived => {}
                        Some(_) => {
                            return Err(invalid(format!(
                                "input `{}` is itself derived",
                                input
                            )))
                        }
                        None => {
                            return Err(invalid(format!("unknown input field `{}`", input)))
                        }
                    }
                }
                if let Derivation::RatioBand { bands, .. } = derivation {
                    if bands.is_empty() {
                        return Err(invalid("ratio_band needs at least one band".to_string()));
                    }
                }
                Ok(())
            }
            (_, Some(_)) => Err(invalid(
                "only derived fields may declare a derivation".to_string(),
            )),
            (_, None) => Ok(()),
        }
    }
}

// ============================================================================
// Lookups
// ============================================================================

/// Find `source_id` in a map keyed by source id or `prefix:*` pattern
pub fn lookup_source<'a, T>(map: &'a BTreeMap<String, T>, source_id: &str) -> Option<&'a T> {
    if let Some(value) = map.get(source_id) {
        return Some(value);
    }
    let (prefix, _) = source_id.split_once(':')?;
    map.get(&format!("{}:*", prefix))
}

impl ResolutionPolicy {
    /// Upper bound for any same-tier disagreement
    pub fn tie_cap(&self) -> f64 {
        self.thresholds.auto_approve_threshold - self.thresholds.tie_margin
    }

    pub fn field(&self, field: &str) -> Option<&FieldPolicy> {
        self.fields.get(field)
    }

    /// Category governing `field` (the default category when undeclared)
    pub fn category_for(&self, field: &str) -> CategoryPolicy {
        self.fields
            .get(field)
            .and_then(|f| f.category.as_deref())
            .and_then(|c| self.categories.get(c))
            .or_else(|| self.categories.get(DEFAULT_CATEGORY))
            .cloned()
            .unwrap_or_default()
    }

    pub fn precision_for(&self, field: &str) -> u32 {
        self.fields
            .get(field)
            .and_then(|f| f.precision)
            .unwrap_or(self.thresholds.default_precision)
    }

    pub fn has_source_profile(&self, source_id: &str) -> bool {
        lookup_source(&self.sources, source_id).is_some()
    }

    /// Effective profile of `source_id`; `fallback_tier` applies when no
    /// profile is declared
    pub fn source_info(&self, source_id: &str, fallback_tier: TrustTier) -> SourceInfo {
        match lookup_source(&self.sources, source_id) {
            Some(profile) => SourceInfo {
                source_id: source_id.to_string(),
                tier: profile.tier,
                trust: profile.trust.unwrap_or_else(|| profile.tier.default_trust()),
                automated: profile.automated,
                origin: profile
                    .syndicates
                    .clone()
                    .unwrap_or_else(|| source_id.to_string()),
            },
            None => SourceInfo {
                source_id: source_id.to_string(),
                tier: fallback_tier,
                trust: fallback_tier.default_trust(),
                automated: fallback_tier != TrustTier::Editorial,
                origin: source_id.to_string(),
            },
        }
    }

    /// Blend entry matching `source_id` for `field`: the declared key
    /// (a source id or a `prefix:*` pattern) and its weight
    pub fn blend_entry(&self, field: &str, source_id: &str) -> Option<(&str, f64)> {
        let blend = &self.fields.get(field)?.blend;
        if let Some((key, weight)) = blend.get_key_value(source_id) {
            return Some((key.as_str(), *weight));
        }
        let (prefix, _) = source_id.split_once(':')?;
        blend
            .get_key_value(&format!("{}:*", prefix))
            .map(|(key, weight)| (key.as_str(), *weight))
    }

    /// Canonical form of an already normalized text value
    pub fn canonical_alias<'a>(&'a self, normalized: &'a str) -> &'a str {
        self.aliases
            .get(normalized)
            .map(String::as_str)
            .unwrap_or(normalized)
    }

    /// Fields declared DERIVED, in name order
    pub fn derived_fields(&self) -> impl Iterator<Item = (&String, &Derivation)> {
        self.fields
            .iter()
            .filter_map(|(name, f)| f.derivation.as_ref().map(|d| (name, d)))
    }

    /// True when a freshness rule is declared
    pub fn has_freshness_rule(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.check, RuleCheck::Freshness { .. }))
    }
}
