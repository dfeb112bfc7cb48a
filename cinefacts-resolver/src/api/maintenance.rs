//! Ingest and batch resolution handlers
//!
//! POST /ingest        - fetcher output (records, provider payloads, failures)
//! POST /resolve/batch - re-resolve listed entities, or all of them

use axum::{
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use cinefacts_common::time::now;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::sources::{IngestBatch, IngestReport};
use crate::workflow::BatchReport;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct IngestQuery {
    /// Re-resolve the touched entities after storing
    #[serde(default)]
    pub resolve: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestResponse {
    pub report: IngestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<BatchReport>,
}

/// POST /resolve/batch request
#[derive(Debug, Default, Deserialize)]
pub struct BatchRequest {
    /// Every known entity when omitted
    #[serde(default)]
    pub entity_ids: Option<Vec<String>>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// POST /ingest
pub async fn ingest(
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    Json(batch): Json<IngestBatch>,
) -> ApiResult<Json<IngestResponse>> {
    if batch.is_empty() {
        return Err(ApiError::BadRequest("Empty ingest batch".to_string()));
    }

    let report = state.pipeline.ingest(batch, now()).await?;

    let resolution = if query.resolve && !report.entities.is_empty() {
        Some(run_batch(&state, report.entities.clone(), None).await?)
    } else {
        None
    };

    Ok(Json(IngestResponse { report, resolution }))
}

/// POST /resolve/batch
pub async fn resolve_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchReport>> {
    let entity_ids = match request.entity_ids {
        Some(ids) => ids,
        None => state.store.list_entities().await?,
    };
    Ok(Json(run_batch(&state, entity_ids, request.concurrency).await?))
}

/// Holds the single batch slot; released on drop, including when the
/// handler future is dropped mid-batch
struct BatchSlot {
    running: Arc<AtomicBool>,
}

impl BatchSlot {
    fn try_acquire(running: &Arc<AtomicBool>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self {
                running: Arc::clone(running),
            })
    }
}

impl Drop for BatchSlot {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// One batch at a time; a second request gets 409
async fn run_batch(
    state: &AppState,
    entity_ids: Vec<String>,
    concurrency: Option<usize>,
) -> ApiResult<BatchReport> {
    let Some(slot) = BatchSlot::try_acquire(&state.batch_running) else {
        return Err(ApiError::Conflict(
            "Batch resolution already running".to_string(),
        ));
    };

    let concurrency = concurrency.unwrap_or(state.batch_concurrency);
    let report = state
        .pipeline
        .resolve_batch(entity_ids, concurrency, &state.shutdown, now())
        .await;
    drop(slot);

    if report.failed > 0 {
        let mut last_error = state.last_error.write().await;
        *last_error = Some(format!(
            "{} of {} entities failed in the last batch",
            report.failed, report.total
        ));
    }
    Ok(report)
}

pub fn maintenance_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(ingest))
        .route("/resolve/batch", post(resolve_batch))
}
