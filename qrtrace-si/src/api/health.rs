//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::db::stats::{corpus_stats, CorpusStats};
use crate::error::ApiResult;
use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (e.g., "ok")
    pub status: String,
    /// Module name ("qrtrace-si")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    /// Aggregate statistics over the submission corpus
    pub stats: CorpusStats,
}

/// GET /health
///
/// Health check endpoint for monitoring, with corpus statistics.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let stats = corpus_stats(&state.db).await?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        module: "qrtrace-si".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        stats,
    }))
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
