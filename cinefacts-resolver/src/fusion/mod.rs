//! Resolution layer
//!
//! Turns cross-validated claims into ResolvedValues and decides which of them
//! may be published:
//! - `conflict_resolver`: trust hierarchy, majority, tie and blend resolution
//! - `consensus`: the publish gate
//! - `derivation`: DERIVED fields computed from resolved inputs
//! - `digest`: input digests that keep re-resolution idempotent

pub mod conflict_resolver;
pub mod consensus;
pub mod derivation;
pub mod digest;

pub use conflict_resolver::{ConflictResolver, OpinionResolution, Resolution};
pub use consensus::ConsensusEngine;
pub use derivation::{derive, Derived};
