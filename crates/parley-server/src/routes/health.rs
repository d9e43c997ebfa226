//! Health and stats endpoints.

use axum::{Json, Router, extract::State, routing::get};
use parley_pool::PoolSnapshot;
use serde::{Deserialize, Serialize};

use crate::barge_in::BargeInStats;
use crate::connections::RegistryStats;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service version.
    pub version: String,
}

/// Operational snapshot of every component.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_secs: u64,
    pub connections: RegistryStats,
    pub sessions: usize,
    pub barge_in: BargeInStats,
    pub pools: Vec<PoolSnapshot>,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_secs: state.uptime_secs(),
        connections: state.connections.stats(),
        sessions: state.sessions.session_count(),
        barge_in: state.barge_in.stats(),
        pools: state.pool_snapshots(),
    })
}

/// Create health and stats routes.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
}
