//! Cross-source validation
//!
//! Normalizes claimed values and groups FACT claims from independent origins
//! so the conflict resolver can rank them.

pub mod cross_validator;
pub mod normalize;

pub use cross_validator::{CrossValidator, FieldAssessment, OriginClaim, ValueGroup};
