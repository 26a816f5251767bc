//! Dependency graph endpoints.

use super::super::state::AppState;
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use orchestrator::GraphSnapshot;
use serde::Serialize;
use warden_core::ValidationResult;

/// GET /dependencies response: the graph plus its validation.
#[derive(Debug, Serialize)]
pub struct DependencyResponse {
    #[serde(flatten)]
    pub graph: GraphSnapshot,
    pub validation: ValidationResult,
}

/// GET /dependencies
pub async fn graph(State(state): State<AppState>) -> Json<DependencyResponse> {
    Json(DependencyResponse {
        graph: state.orchestrator.dependency_graph(),
        validation: state.orchestrator.dependency_validation(),
    })
}

/// GET /dependencies/dot - Graphviz rendering
pub async fn dot(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/vnd.graphviz; charset=utf-8")],
        state.orchestrator.dependency_dot(),
    )
}
