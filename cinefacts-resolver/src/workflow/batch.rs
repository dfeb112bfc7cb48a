// Batch runner - many entities, bounded concurrency
//
// Entities run in parallel up to `concurrency`; each entity's run is still
// strictly sequential and serialized by its entity lock. Cancellation only
// stops new entities from starting. A failing entity is logged and counted;
// the batch moves on.

use super::{PipelineError, ResolutionEvent, ResolutionPipeline};
use crate::types::EntityStatus;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Per-entity line of a batch report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityOutcome {
    pub entity_id: String,
    /// Final status; `None` when the run failed or never started
    pub status: Option<EntityStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub skipped: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub resolved: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Sorted by entity id
    pub entities: Vec<EntityOutcome>,
}

impl ResolutionPipeline {
    /// Resolve every entity in `entity_ids` with at most `concurrency` in flight
    pub async fn resolve_batch(
        &self,
        entity_ids: Vec<String>,
        concurrency: usize,
        cancel: &CancellationToken,
        as_of: DateTime<Utc>,
    ) -> BatchReport {
        let total = entity_ids.len();
        let concurrency = concurrency.max(1);

        info!(entities = total, concurrency, "Starting batch resolution");

        let mut entities: Vec<EntityOutcome> = stream::iter(entity_ids)
            .map(|entity_id| async move {
                // Checked before starting; in-flight entities run to completion
                if cancel.is_cancelled() {
                    self.emit_event(ResolutionEvent::EntitySkipped {
                        entity_id: entity_id.clone(),
                    })
                    .await;
                    return EntityOutcome {
                        entity_id,
                        status: None,
                        error: None,
                        skipped: true,
                    };
                }

                match self.resolve_entity(&entity_id, as_of).await {
                    Ok(run) => EntityOutcome {
                        entity_id,
                        status: Some(run.status),
                        error: None,
                        skipped: false,
                    },
                    Err(e) => {
                        log_failure(&entity_id, &e);
                        EntityOutcome {
                            entity_id,
                            status: None,
                            error: Some(e.to_string()),
                            skipped: false,
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        self.locks().prune_idle().await;

        let skipped = entities.iter().filter(|e| e.skipped).count();
        let failed = entities.iter().filter(|e| e.error.is_some()).count();
        let report = BatchReport {
            total,
            resolved: total - skipped - failed,
            failed,
            skipped,
            cancelled: cancel.is_cancelled(),
            entities,
        };

        self.emit_event(ResolutionEvent::BatchCompleted {
            resolved: report.resolved,
            failed: report.failed,
            skipped: report.skipped,
        })
        .await;

        info!(
            total = report.total,
            resolved = report.resolved,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Batch resolution completed"
        );
        report
    }

    /// Resolve every entity known to the store
    pub async fn resolve_all(
        &self,
        concurrency: usize,
        cancel: &CancellationToken,
        as_of: DateTime<Utc>,
    ) -> Result<BatchReport, PipelineError> {
        let entity_ids = self.store().list_entities().await?;
        Ok(self.resolve_batch(entity_ids, concurrency, cancel, as_of).await)
    }
}

fn log_failure(entity_id: &str, err: &PipelineError) {
    error!(entity_id, error = %err, "Entity resolution failed");
}
