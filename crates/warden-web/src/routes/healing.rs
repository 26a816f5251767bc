//! Healing history, stats and circuit breaker endpoints.

use super::super::state::AppState;
use axum::{
    extract::{Query, State},
    response::Json,
};
use orchestrator::{CircuitSnapshot, HealingStats};
use serde::{Deserialize, Serialize};
use warden_core::HealingEvent;

/// Events returned when no limit is given.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /healing-history response
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Events currently held in the history.
    pub total: usize,
    pub events: Vec<HealingEvent>,
}

/// GET /healing-history?limit=N - the most recent N events, oldest first
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(HistoryResponse {
        total: state.orchestrator.healing().history().len(),
        events: state.orchestrator.healing_history(limit),
    })
}

/// GET /healing-stats
pub async fn stats(State(state): State<AppState>) -> Json<HealingStats> {
    Json(state.orchestrator.healing_stats())
}

/// GET /circuit-breakers
pub async fn circuit_breakers(State(state): State<AppState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.orchestrator.circuit_breakers())
}
