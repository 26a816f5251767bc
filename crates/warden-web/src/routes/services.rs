//! Workload endpoints and manual commands.

use super::super::error::{AppError, Result};
use super::super::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use orchestrator::{MasterOrchestrator, RegistryEntry};
use serde::Serialize;
use tracing::{info, warn};
use warden_core::{HealthCheckResult, Priority, WorkloadMetadata, WorkloadMetrics, WorkloadStatus};

/// Health checks embedded in the service list.
pub const SUMMARY_HEALTH_CHECKS: usize = 10;
/// Health checks embedded in the service detail.
pub const DETAIL_HEALTH_CHECKS: usize = 20;

/// One row of GET /services
#[derive(Debug, Serialize)]
pub struct ServiceSummary {
    pub name: String,
    pub status: WorkloadStatus,
    pub port: u16,
    pub priority: Priority,
    pub phase: usize,
    pub uptime_ms: u64,
    pub restart_attempts: u32,
    pub recent_health: Vec<HealthCheckResult>,
    pub metrics: WorkloadMetrics,
}

/// GET /services
#[derive(Debug, Serialize)]
pub struct ServiceList {
    pub total: usize,
    pub services: Vec<ServiceSummary>,
}

/// GET /services/{name}
#[derive(Debug, Serialize)]
pub struct ServiceDetail {
    pub metadata: WorkloadMetadata,
    pub status: WorkloadStatus,
    pub phase: usize,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub uptime_ms: u64,
    pub restart_attempts: u32,
    pub last_restart_time: Option<DateTime<Utc>>,
    pub health_history: Vec<HealthCheckResult>,
    pub metrics: WorkloadMetrics,
}

/// Result of a manual command.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
}

fn phase(orchestrator: &MasterOrchestrator, entry: &RegistryEntry) -> usize {
    orchestrator
        .phase_of(entry.name())
        .unwrap_or(entry.metadata.launch_phase)
}

fn summarize(orchestrator: &MasterOrchestrator, entry: RegistryEntry) -> ServiceSummary {
    ServiceSummary {
        phase: phase(orchestrator, &entry),
        recent_health: entry.recent_health(SUMMARY_HEALTH_CHECKS),
        name: entry.metadata.name,
        status: entry.status,
        port: entry.metadata.port,
        priority: entry.metadata.priority,
        uptime_ms: entry.uptime_ms,
        restart_attempts: entry.restart_attempts,
        metrics: entry.metrics,
    }
}

/// GET /services
pub async fn list_services(State(state): State<AppState>) -> Json<ServiceList> {
    let orchestrator = &state.orchestrator;
    let services: Vec<ServiceSummary> = orchestrator
        .services()
        .await
        .into_iter()
        .map(|entry| summarize(orchestrator, entry))
        .collect();
    Json(ServiceList {
        total: services.len(),
        services,
    })
}

/// GET /services/{name}
pub async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceDetail>> {
    let entry = state.orchestrator.service(&name).await?;
    Ok(Json(ServiceDetail {
        phase: phase(&state.orchestrator, &entry),
        health_history: entry.recent_health(DETAIL_HEALTH_CHECKS),
        status: entry.status,
        pid: entry.pid,
        start_time: entry.start_time,
        last_health_check: entry.last_health_check,
        uptime_ms: entry.uptime_ms,
        restart_attempts: entry.restart_attempts,
        last_restart_time: entry.last_restart_time,
        metrics: entry.metrics,
        metadata: entry.metadata,
    }))
}

/// POST /restart/{name}
///
/// Always answers `{success, message}`; the status code tells unknown (404),
/// quarantined (409) and failed launches (500) apart.
pub async fn restart_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<CommandResponse>) {
    match state.orchestrator.restart_service(&name).await {
        Ok(()) => {
            info!(workload = %name, "Manual restart succeeded");
            (
                StatusCode::OK,
                Json(CommandResponse {
                    success: true,
                    message: format!("workload '{name}' restarted"),
                }),
            )
        }
        Err(e) => {
            warn!(workload = %name, error = %e, "Manual restart failed");
            let message = e.to_string();
            (
                AppError::from(e).status_code(),
                Json(CommandResponse {
                    success: false,
                    message,
                }),
            )
        }
    }
}

/// POST /reset/{name} - clear counters and the circuit, lift quarantine
pub async fn reset_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<CommandResponse>> {
    state.orchestrator.reset_service(&name).await?;
    Ok(Json(CommandResponse {
        success: true,
        message: format!("workload '{name}' reset"),
    }))
}
