//! Per-entity resolution workflow
//!
//! Runs classify -> cross-validate -> resolve -> consensus -> derive ->
//! governance -> commit for one entity at a time, and fans batches of
//! entities out over a bounded number of concurrent runs.

pub mod batch;
pub mod locks;
pub mod pipeline;

pub use batch::{BatchReport, EntityOutcome};
pub use locks::EntityLocks;
pub use pipeline::{EntityRun, PipelineError, ResolutionPipeline};

use crate::types::{EntityStatus, TrustLevel};
use serde::{Deserialize, Serialize};

/// Progress events for observers of resolution runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResolutionEvent {
    EntityStarted {
        entity_id: String,
    },
    EntityResolved {
        entity_id: String,
        status: EntityStatus,
        overall_level: TrustLevel,
        resolved_fields: usize,
        queued_fields: usize,
    },
    EntityFailed {
        entity_id: String,
        message: String,
    },
    /// Not started because the batch was cancelled
    EntitySkipped {
        entity_id: String,
    },
    BatchCompleted {
        resolved: usize,
        failed: usize,
        skipped: usize,
    },
}
