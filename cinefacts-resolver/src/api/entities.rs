//! Entity query and maintenance handlers
//!
//! GET  /entities/:entity_id/fields
//! GET  /entities/:entity_id/fields/:field
//! GET  /entities/:entity_id/trust
//! GET  /entities/:entity_id/audit
//! POST /entities/:entity_id/resolve
//! POST /entities/:entity_id/fields/:field/curate

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use cinefacts_common::time::now;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::governance::decay::decayed_confidence;
use crate::types::{AuditRecord, FieldValue, ResolvedValue, TrustScore};
use crate::workflow::pipeline::{Curation, EntityRun};
use crate::AppState;

/// A resolved value with its confidence as stored and as of now
#[derive(Debug, Serialize, Deserialize)]
pub struct FieldResponse {
    pub resolved: ResolvedValue,
    pub stored_confidence: f64,
    pub decayed_confidence: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FieldsResponse {
    pub entity_id: String,
    pub fields: Vec<FieldResponse>,
}

/// POST /entities/:entity_id/fields/:field/curate request
#[derive(Debug, Deserialize)]
pub struct CurateRequest {
    pub value: FieldValue,
    pub editor: String,
    #[serde(default)]
    pub note: Option<String>,
}

fn with_decay(state: &AppState, resolved: ResolvedValue) -> FieldResponse {
    let decayed = decayed_confidence(
        resolved.confidence_score,
        resolved.observed_at,
        now(),
        &state.policy.category_for(&resolved.field_name),
    );
    FieldResponse {
        stored_confidence: resolved.confidence_score,
        decayed_confidence: decayed,
        resolved,
    }
}

/// GET /entities/:entity_id/fields/:field
pub async fn get_field(
    State(state): State<AppState>,
    Path((entity_id, field)): Path<(String, String)>,
) -> ApiResult<Json<FieldResponse>> {
    let resolved = state
        .store
        .get_resolved_value(&entity_id, &field)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No resolved value for {}.{}", entity_id, field))
        })?;
    Ok(Json(with_decay(&state, resolved)))
}

/// GET /entities/:entity_id/fields
pub async fn list_fields(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<FieldsResponse>> {
    let values = state.store.load_resolved_values(&entity_id).await?;
    if values.is_empty() && state.store.load_status(&entity_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Entity not resolved: {}", entity_id)));
    }
    let fields = values
        .into_iter()
        .map(|value| with_decay(&state, value))
        .collect();
    Ok(Json(FieldsResponse { entity_id, fields }))
}

/// GET /entities/:entity_id/trust
pub async fn get_trust(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<TrustScore>> {
    let score = state
        .store
        .load_trust_score(&entity_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No trust score for {}", entity_id)))?;
    Ok(Json(score))
}

/// GET /entities/:entity_id/audit
pub async fn get_audit(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    let trail = state.store.load_audit_trail(&entity_id).await?;
    if trail.is_empty() {
        return Err(ApiError::NotFound(format!("No audit trail for {}", entity_id)));
    }
    Ok(Json(trail))
}

/// POST /entities/:entity_id/resolve
pub async fn resolve_entity(
    State(state): State<AppState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<EntityRun>> {
    match state.pipeline.resolve_entity(&entity_id, now()).await {
        Ok(run) => Ok(Json(run)),
        Err(e) => {
            state.record_error(&e).await;
            Err(e.into())
        }
    }
}

/// POST /entities/:entity_id/fields/:field/curate
///
/// Appends an editorial SourceRecord and re-resolves the entity.
pub async fn curate_field(
    State(state): State<AppState>,
    Path((entity_id, field)): Path<(String, String)>,
    Json(request): Json<CurateRequest>,
) -> ApiResult<Json<EntityRun>> {
    let curation = Curation {
        entity_id,
        field,
        value: request.value,
        editor: request.editor,
        note: request.note,
    };
    match state.pipeline.curate(curation, now()).await {
        Ok(run) => Ok(Json(run)),
        Err(e) => {
            state.record_error(&e).await;
            Err(e.into())
        }
    }
}

/// Build entity routes
pub fn entity_routes() -> Router<AppState> {
    Router::new()
        .route("/entities/:entity_id/fields", get(list_fields))
        .route("/entities/:entity_id/fields/:field", get(get_field))
        .route("/entities/:entity_id/fields/:field/curate", post(curate_field))
        .route("/entities/:entity_id/trust", get(get_trust))
        .route("/entities/:entity_id/audit", get(get_audit))
        .route("/entities/:entity_id/resolve", post(resolve_entity))
}
