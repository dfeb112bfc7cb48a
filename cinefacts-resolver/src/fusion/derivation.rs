//! DERIVED field computation
//!
//! Derived fields are never resolved from sources. They are recomputed after
//! FACT resolution from the resolved inputs, with a confidence equal to the
//! weakest input.

use crate::config::{Derivation, ResolutionPolicy};
use crate::fusion::digest::InputsDigest;
use crate::types::{ContributingSource, FieldValue, ResolutionMethod, ResolvedValue};
use crate::validators::normalize::round_to;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Outcome of one derivation attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Derived {
    Value(ResolvedValue),
    /// Inputs missing or unusable; the field stays unset
    Skipped(String),
}

pub fn derive(
    policy: &ResolutionPolicy,
    entity_id: &str,
    field: &str,
    derivation: &Derivation,
    resolved: &BTreeMap<String, ResolvedValue>,
    resolved_at: DateTime<Utc>,
) -> Derived {
    let [numerator_field, denominator_field] = derivation.inputs();
    let (Some(numerator), Some(denominator)) =
        (resolved.get(numerator_field), resolved.get(denominator_field))
    else {
        return Derived::Skipped(format!(
            "missing input {} or {}",
            numerator_field, denominator_field
        ));
    };

    let (Some(n), Some(d)) = (numerator.value.as_f64(), denominator.value.as_f64()) else {
        return Derived::Skipped("inputs are not numeric".to_string());
    };
    if d == 0.0 {
        return Derived::Skipped(format!("{} is zero", denominator_field));
    }
    let ratio = n / d;

    let value = match derivation {
        Derivation::Ratio { .. } => FieldValue::Number(round_to(ratio, policy.precision_for(field))),
        Derivation::RatioBand { bands, .. } => {
            // bands are sorted by `min` descending at policy load
            match bands.iter().find(|band| ratio >= band.min) {
                Some(band) => FieldValue::Text(band.label.clone()),
                None => return Derived::Skipped(format!("ratio {:.2} below every band", ratio)),
            }
        }
    };

    let inputs = [numerator, denominator];
    let mut digest = InputsDigest::new(&policy.version, field);
    for input in inputs {
        digest.push_upstream(&input.field_name, &input.inputs_digest);
    }

    let mut contributing_sources: Vec<ContributingSource> = Vec::new();
    for input in inputs {
        for source in &input.contributing_sources {
            if !contributing_sources.iter().any(|s| s.source_id == source.source_id) {
                contributing_sources.push(source.clone());
            }
        }
    }
    contributing_sources.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    Derived::Value(ResolvedValue {
        entity_id: entity_id.to_string(),
        field_name: field.to_string(),
        value,
        confidence_score: numerator.confidence_score.min(denominator.confidence_score),
        contributing_sources,
        resolution_method: ResolutionMethod::Derived,
        resolved_at,
        observed_at: numerator.observed_at.min(denominator.observed_at),
        inputs_digest: digest.finish(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TrustTier;

    fn input(field: &str, value: i64, confidence: f64) -> ResolvedValue {
        ResolvedValue {
            entity_id: "movie-hanuman".to_string(),
            field_name: field.to_string(),
            value: FieldValue::Integer(value),
            confidence_score: confidence,
            contributing_sources: vec![ContributingSource {
                source_id: "wikidata".to_string(),
                tier: TrustTier::Curated,
                trust: 0.85,
                retrieved_at: Utc::now(),
            }],
            resolution_method: ResolutionMethod::SingleSource,
            resolved_at: Utc::now(),
            observed_at: Utc::now(),
            inputs_digest: format!("digest-{}", field),
        }
    }

    fn run(field: &str, budget: i64, gross: i64) -> Derived {
        let policy = ResolutionPolicy::builtin().unwrap();
        let mut resolved = BTreeMap::new();
        resolved.insert("budget".to_string(), input("budget", budget, 0.9));
        resolved.insert("worldwide_gross".to_string(), input("worldwide_gross", gross, 0.7));
        let derivation = policy.field(field).unwrap().derivation.clone().unwrap();
        derive(&policy, "movie-hanuman", field, &derivation, &resolved, Utc::now())
    }

    #[test]
    fn test_box_office_verdict_bands() {
        match run("box_office_verdict", 40, 300) {
            Derived::Value(value) => {
                assert_eq!(value.value, FieldValue::Text("blockbuster".into()));
                assert_eq!(value.confidence_score, 0.7);
                assert_eq!(value.resolution_method, ResolutionMethod::Derived);
            }
            other => panic!("unexpected {:?}", other),
        }
        match run("box_office_verdict", 100, 80) {
            Derived::Value(value) => assert_eq!(value.value, FieldValue::Text("flop".into())),
            other => panic!("unexpected {:?}", other),
        }
        match run("box_office_verdict", 100, 160) {
            Derived::Value(value) => assert_eq!(value.value, FieldValue::Text("hit".into())),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ratio_rounded_to_precision() {
        match run("box_office_ratio", 3, 10) {
            Derived::Value(value) => assert_eq!(value.value, FieldValue::Number(3.33)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zero_denominator_skipped() {
        assert!(matches!(run("box_office_ratio", 0, 10), Derived::Skipped(_)));
    }

    #[test]
    fn test_missing_input_skipped() {
        let policy = ResolutionPolicy::builtin().unwrap();
        let derivation = policy.field("box_office_ratio").unwrap().derivation.clone().unwrap();
        let result = derive(&policy, "movie-x", "box_office_ratio", &derivation, &BTreeMap::new(), Utc::now());
        assert!(matches!(result, Derived::Skipped(reason) if reason.contains("missing input")));
    }
}
