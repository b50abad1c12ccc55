//! qrtrace-si library interface
//!
//! Exposes the pipeline, stores, and router for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::twilio::SmsGateway;
use crate::services::SubmissionPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Submission processing pipeline with injected collaborators
    pub pipeline: Arc<SubmissionPipeline>,
    /// SMS transport for media download and outbound replies
    pub gateway: Arc<dyn SmsGateway>,
    /// Directory holding stored submission images
    pub images_dir: PathBuf,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        pipeline: Arc<SubmissionPipeline>,
        gateway: Arc<dyn SmsGateway>,
        images_dir: PathBuf,
    ) -> Self {
        Self {
            db,
            pipeline,
            gateway,
            images_dir,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::index_routes())
        .merge(api::webhook_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
