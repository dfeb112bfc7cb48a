//! Freshness decay
//!
//! Confidence holds steady for a grace window after the value was last
//! observed, then halves every `half_life_days`:
//!
//! `decayed = confidence * 0.5^(max(0, age_days - window) / half_life)`
//!
//! The result is monotonically non-increasing in age and never exceeds the
//! stored confidence.

use crate::config::CategoryPolicy;
use cinefacts_common::time::days_between;
use chrono::{DateTime, Utc};

/// Decayed confidence after `age_days` of no refresh
pub fn decay(confidence: f64, age_days: f64, window_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return confidence;
    }
    let overdue = (age_days - window_days).max(0.0);
    let factor = 0.5f64.powf(overdue / half_life_days);
    (confidence * factor).clamp(0.0, confidence.max(0.0))
}

/// Decayed confidence of a value observed at `observed_at`, evaluated at `as_of`
pub fn decayed_confidence(
    confidence: f64,
    observed_at: DateTime<Utc>,
    as_of: DateTime<Utc>,
    category: &CategoryPolicy,
) -> f64 {
    decay(
        confidence,
        days_between(observed_at, as_of),
        category.decay_window_days,
        category.half_life_days,
    )
}

/// True once the value is older than its category's grace window
pub fn past_window(observed_at: DateTime<Utc>, as_of: DateTime<Utc>, category: &CategoryPolicy) -> bool {
    days_between(observed_at, as_of) > category.decay_window_days
}
