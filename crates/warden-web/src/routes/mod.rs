//! REST API routes
//!
//! ## Route Structure
//!
//! - `GET /` - endpoint index
//! - `GET /health` - liveness of the control plane
//! - `GET /status` - full orchestrator status
//! - `GET /stats` - uptime, state and counts
//! - `GET /health-status` - aggregate workload health
//! - `GET /services`, `GET /services/{name}` - workload state
//! - `POST /restart/{name}`, `POST /reset/{name}` - manual commands
//! - `GET /dependencies`, `GET /dependencies/dot` - dependency graph
//! - `GET /healing-history`, `GET /healing-stats`, `GET /circuit-breakers`
//! - WebSocket stream at the configured path

use super::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};

pub mod dependencies;
pub mod healing;
pub mod services;
pub mod system;
pub mod websocket;

/// Every route the control plane serves, paths mounted at the root.
pub fn create_routes(websocket_path: &str) -> Router<AppState> {
    Router::new()
        .route("/", get(system::index))
        .route("/health", get(system::health_check))
        .route("/status", get(system::status))
        .route("/stats", get(system::stats))
        .route("/health-status", get(system::health_status))
        .route("/services", get(services::list_services))
        .route("/services/{name}", get(services::get_service))
        .route("/restart/{name}", post(services::restart_service))
        .route("/reset/{name}", post(services::reset_service))
        .route("/dependencies", get(dependencies::graph))
        .route("/dependencies/dot", get(dependencies::dot))
        .route("/healing-history", get(healing::history))
        .route("/healing-stats", get(healing::stats))
        .route("/circuit-breakers", get(healing::circuit_breakers))
        .route(websocket_path, get(websocket::websocket_handler))
}
