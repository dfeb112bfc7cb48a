//! TrustScore assembly
//!
//! A TrustScore is never a bare number: it carries every rule outcome, the
//! stored and decayed confidence of each field and a readable explanation.

use crate::config::TrustLevelBands;
use crate::types::{EntityStatus, FieldConfidence, RuleOutcome, RuleSeverity, TrustLevel};

/// Overall level from rule outcomes and decayed field confidences
///
/// Low when a critical rule fails or the mean decayed confidence is below
/// `medium_min`; high when the mean reaches `high_min` and no warning failed.
pub fn overall_level(
    outcomes: &[RuleOutcome],
    confidences: &[FieldConfidence],
    bands: &TrustLevelBands,
) -> TrustLevel {
    let critical_failed = outcomes
        .iter()
        .any(|o| !o.passed && o.severity == RuleSeverity::Critical);
    let warning_failed = outcomes
        .iter()
        .any(|o| !o.passed && o.severity == RuleSeverity::Warning);
    let mean = mean_decayed(confidences);

    if critical_failed || mean < bands.medium_min {
        TrustLevel::Low
    } else if mean >= bands.high_min && !warning_failed {
        TrustLevel::High
    } else {
        TrustLevel::Medium
    }
}

pub fn mean_decayed(confidences: &[FieldConfidence]) -> f64 {
    if confidences.is_empty() {
        return 0.0;
    }
    confidences.iter().map(|c| c.decayed).sum::<f64>() / confidences.len() as f64
}

/// Human-readable summary listing every rule outcome
pub fn explain(
    status: EntityStatus,
    level: TrustLevel,
    outcomes: &[RuleOutcome],
    confidences: &[FieldConfidence],
) -> String {
    let approved = confidences.iter().filter(|c| c.approved).count();
    let mut lines = vec![format!(
        "status {}, trust {:?}; {} of {} fields approved, mean decayed confidence {:.2}",
        status,
        level,
        approved,
        confidences.len(),
        mean_decayed(confidences)
    )
    .to_lowercase()];

    for outcome in outcomes {
        let mark = match (outcome.passed, outcome.severity) {
            (true, _) => "PASS",
            (false, RuleSeverity::Critical) => "FAIL",
            (false, RuleSeverity::Warning) => "WARN",
        };
        lines.push(format!(
            "[{}] {} v{}: {}",
            mark, outcome.rule, outcome.version, outcome.explanation
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(severity: RuleSeverity, passed: bool) -> RuleOutcome {
        RuleOutcome {
            rule: "r".to_string(),
            version: 1,
            severity,
            passed,
            explanation: String::new(),
        }
    }

    fn confidence(decayed: f64) -> FieldConfidence {
        FieldConfidence {
            field: "title".to_string(),
            stored: decayed,
            decayed,
            approved: true,
        }
    }

    #[test]
    fn test_critical_failure_is_low() {
        let level = overall_level(
            &[outcome(RuleSeverity::Critical, false)],
            &[confidence(0.99)],
            &TrustLevelBands::default(),
        );
        assert_eq!(level, TrustLevel::Low);
    }

    #[test]
    fn test_high_requires_no_warning() {
        let bands = TrustLevelBands::default();
        assert_eq!(
            overall_level(&[outcome(RuleSeverity::Warning, true)], &[confidence(0.9)], &bands),
            TrustLevel::High
        );
        assert_eq!(
            overall_level(&[outcome(RuleSeverity::Warning, false)], &[confidence(0.9)], &bands),
            TrustLevel::Medium
        );
    }

    #[test]
    fn test_mean_below_medium_is_low() {
        let level = overall_level(&[], &[confidence(0.3), confidence(0.7)], &TrustLevelBands::default());
        assert_eq!(level, TrustLevel::Low);
    }

    #[test]
    fn test_no_fields_is_low() {
        assert_eq!(overall_level(&[], &[], &TrustLevelBands::default()), TrustLevel::Low);
    }

    #[test]
    fn test_explanation_lists_each_rule() {
        let mut failed = outcome(RuleSeverity::Critical, false);
        failed.rule = "required-movie-fields".to_string();
        failed.explanation = "release_year has no value from any source".to_string();
        let text = explain(
            EntityStatus::Blocked,
            TrustLevel::Low,
            &[failed, outcome(RuleSeverity::Warning, true)],
            &[confidence(0.8)],
        );
        assert!(text.starts_with("status blocked, trust low"));
        assert!(text.contains("[FAIL] required-movie-fields v1"));
        assert!(text.contains("[PASS] r v1"));
    }
}
