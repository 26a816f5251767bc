//! Control-plane level endpoints: index, liveness, status and stats.

use super::super::state::AppState;
use axum::{extract::State, response::Json};
use orchestrator::{OrchestratorState, OrchestratorStatus, RegistryStats, SystemHealth};
use serde::Serialize;

/// GET / response
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    name: &'static str,
    version: &'static str,
    endpoints: Vec<String>,
}

/// GET /health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    state: OrchestratorState,
    uptime_ms: u64,
}

/// GET /stats response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_ms: u64,
    pub state: OrchestratorState,
    pub services: RegistryStats,
    pub stream_clients: usize,
    pub event_subscribers: usize,
}

pub async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    let endpoints = [
        "GET /health",
        "GET /status",
        "GET /stats",
        "GET /health-status",
        "GET /services",
        "GET /services/{name}",
        "POST /restart/{name}",
        "POST /reset/{name}",
        "GET /dependencies",
        "GET /dependencies/dot",
        "GET /healing-history?limit=N",
        "GET /healing-stats",
        "GET /circuit-breakers",
    ]
    .into_iter()
    .map(String::from)
    .chain(std::iter::once(format!("WS {}", state.config.websocket_path)))
    .collect();

    Json(IndexResponse {
        name: "warden",
        version: env!("CARGO_PKG_VERSION"),
        endpoints,
    })
}

/// GET /health - liveness of the control plane itself
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        state: state.orchestrator.state(),
        uptime_ms: state.orchestrator.uptime_ms(),
    })
}

/// GET /status - full orchestrator status snapshot
pub async fn status(State(state): State<AppState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status().await)
}

/// GET /health-status - aggregate workload health
pub async fn health_status(State(state): State<AppState>) -> Json<SystemHealth> {
    Json(state.orchestrator.health_status().await)
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_ms: state.orchestrator.uptime_ms(),
        state: state.orchestrator.state(),
        services: state.orchestrator.registry().stats().await,
        stream_clients: state.stream_client_count(),
        event_subscribers: state.orchestrator.bus().subscriber_count(),
    })
}
