//! Review and refetch queues

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::types::{RefetchRequest, ReviewItem};
use crate::AppState;

const DEFAULT_REVIEW_LIMIT: usize = 50;
const MAX_REVIEW_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct ReviewQueueQuery {
    pub limit: Option<usize>,
}

/// GET /review-queue?limit=
pub async fn review_queue(
    State(state): State<AppState>,
    Query(query): Query<ReviewQueueQuery>,
) -> ApiResult<Json<Vec<ReviewItem>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_REVIEW_LIMIT)
        .clamp(1, MAX_REVIEW_LIMIT);
    Ok(Json(state.store.review_queue(limit).await?))
}

/// GET /refetch-queue
pub async fn refetch_queue(State(state): State<AppState>) -> ApiResult<Json<Vec<RefetchRequest>>> {
    Ok(Json(state.store.refetch_queue().await?))
}

pub fn queue_routes() -> Router<AppState> {
    Router::new()
        .route("/review-queue", get(review_queue))
        .route("/refetch-queue", get(refetch_queue))
}
