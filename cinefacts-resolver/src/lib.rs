//! cinefacts-resolver library interface
//!
//! Multi-source fact resolution for Telugu movie and celebrity data:
//! validate incoming source records, fuse them per field, decide what can be
//! auto-approved, score every entity under data-defined governance rules and
//! keep an audit trail of each run.

pub mod api;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod governance;
pub mod sources;
pub mod types;
pub mod utils;
pub mod validators;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use crate::config::ResolutionPolicy;
use crate::db::FactStore;
use crate::workflow::ResolutionPipeline;
use axum::Router;
use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FactStore>,
    pub pipeline: Arc<ResolutionPipeline>,
    pub policy: Arc<ResolutionPolicy>,
    /// Default concurrency for batch resolution
    pub batch_concurrency: usize,
    /// Set while a batch resolution is in flight
    pub batch_running: Arc<AtomicBool>,
    /// Cancelled on shutdown; batches stop starting new entities
    pub shutdown: CancellationToken,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(pipeline: Arc<ResolutionPipeline>, batch_concurrency: usize) -> Self {
        Self {
            store: pipeline.store().clone(),
            policy: pipeline.shared_policy(),
            pipeline,
            batch_concurrency: batch_concurrency.max(1),
            batch_running: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Remember the most recent failure for `/health`
    pub async fn record_error(&self, err: &impl Display) {
        *self.last_error.write().await = Some(err.to_string());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::entity_routes())
        .merge(api::queue_routes())
        .merge(api::maintenance_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
