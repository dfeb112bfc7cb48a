//! Value normalization for cross-source comparison
//!
//! Two claims agree when their normalized keys are equal. Text is compared
//! case-insensitively with whitespace collapsed and punctuation removed,
//! numbers at a fixed precision, dates as calendar days and lists as sorted
//! sets. Text and list items are finally passed through the policy alias
//! table so known name variants collapse onto one canonical form.

use crate::config::ResolutionPolicy;
use crate::types::FieldValue;
use chrono::NaiveDate;

/// Shape of a normalized value, used to grade disagreements
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedKind {
    Numeric(f64),
    Date(NaiveDate),
    Text,
    List,
}

/// Comparison key of one claimed value
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedValue {
    pub key: String,
    pub kind: NormalizedKind,
}

impl NormalizedValue {
    /// True when a difference between the two values is a contradiction
    /// regardless of how similar their keys look
    pub fn is_quantitative(&self) -> bool {
        matches!(self.kind, NormalizedKind::Numeric(_) | NormalizedKind::Date(_))
    }
}

/// Lowercase, drop punctuation, collapse whitespace
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render `value` with exactly `precision` decimals (no negative zero)
pub fn format_number(value: f64, precision: u32) -> String {
    let rounded = round_to(value, precision);
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.*}", precision as usize, rounded)
}

/// Round half away from zero to `precision` decimals
pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d %B %Y", "%B %d, %Y", "%d %b %Y", "%b %d, %Y", "%d/%m/%Y"];

/// Parse a calendar date in any of the provider formats we receive
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            // ISO timestamps ("2022-03-25T00:00:00Z") keep only the date part
            trimmed
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

/// Normalize one claimed value; `None` for "no claim"
pub fn normalize_value(
    value: &FieldValue,
    precision: u32,
    policy: &ResolutionPolicy,
) -> Option<NormalizedValue> {
    if value.is_no_claim() {
        return None;
    }

    match value {
        FieldValue::Null => None,
        FieldValue::Integer(_) | FieldValue::Number(_) => {
            let number = value.as_f64()?;
            Some(NormalizedValue {
                key: format_number(number, precision),
                kind: NormalizedKind::Numeric(round_to(number, precision)),
            })
        }
        FieldValue::Text(text) => {
            if let Some(date) = parse_date(text) {
                return Some(NormalizedValue {
                    key: date.format("%Y-%m-%d").to_string(),
                    kind: NormalizedKind::Date(date),
                });
            }
            if let Some(number) = value.as_f64() {
                return Some(NormalizedValue {
                    key: format_number(number, precision),
                    kind: NormalizedKind::Numeric(round_to(number, precision)),
                });
            }
            let normalized = normalize_text(text);
            Some(NormalizedValue {
                key: policy.canonical_alias(&normalized).to_string(),
                kind: NormalizedKind::Text,
            })
        }
        FieldValue::List(items) => {
            let mut keys: Vec<String> = items
                .iter()
                .map(|item| normalize_text(item))
                .filter(|item| !item.is_empty())
                .map(|item| policy.canonical_alias(&item).to_string())
                .collect();
            keys.sort();
            keys.dedup();
            if keys.is_empty() {
                return None;
            }
            Some(NormalizedValue {
                key: keys.join(" | "),
                kind: NormalizedKind::List,
            })
        }
    }
}

/// Normalized Levenshtein similarity of two keys
pub fn similarity(a: &NormalizedValue, b: &NormalizedValue) -> f64 {
    strsim::normalized_levenshtein(&a.key, &b.key)
}
