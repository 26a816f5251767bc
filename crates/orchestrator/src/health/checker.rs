//! HTTP health checker.
//!
//! Tries each configured health path in order. A 404 means the workload
//! does not serve that path and the next one is tried; any other response
//! is interpreted on the spot:
//!
//! | Response            | Status                                    |
//! |---------------------|-------------------------------------------|
//! | 200 / 204           | healthy, or degraded if the body says so  |
//! | 429                 | degraded                                  |
//! | 503                 | unhealthy                                 |
//! | anything else       | unhealthy                                 |
//! | every path 404      | unhealthy                                 |
//! | nothing answered    | timeout                                   |

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;
use warden_core::{
    DependencyStatus, Error, HealthCheckResult, HealthConfig, MemoryStats, Result, WorkloadStatus,
};

use super::{HealthProbe, ProbeTarget};

/// Body a workload may return from its health endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HealthPayload {
    status: Option<String>,
    uptime: Option<f64>,
    memory: Option<PayloadMemory>,
    cpu: Option<f64>,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PayloadMemory {
    used: f64,
    total: f64,
    percentage: Option<f64>,
}

impl PayloadMemory {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn into_stats(self) -> MemoryStats {
        let percentage = self.percentage.unwrap_or_else(|| {
            if self.total > 0.0 {
                self.used / self.total * 100.0
            } else {
                0.0
            }
        });
        MemoryStats {
            used: self.used.max(0.0) as u64,
            total: self.total.max(0.0) as u64,
            percentage,
        }
    }
}

/// Reqwest-backed [`HealthProbe`].
#[derive(Debug, Clone)]
pub struct HealthChecker {
    client: Client,
    host: String,
    paths: Vec<String>,
    probe_timeout: Duration,
    dependency_timeout: Duration,
}

impl HealthChecker {
    /// Create a checker from the health settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HealthConfig) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: config.probe_host.clone(),
            paths: config.health_paths.clone(),
            probe_timeout: config.probe_timeout(),
            dependency_timeout: config.dependency_probe_timeout(),
        })
    }

    /// Probe one workload, including dependency connectivity.
    pub async fn check(&self, target: &ProbeTarget) -> HealthCheckResult {
        let started = Instant::now();
        let (mut result, dependencies) = tokio::join!(
            self.check_paths(target),
            self.check_dependencies(&target.dependencies)
        );
        result.response_time_ms = elapsed_ms(started);
        result.dependencies = dependencies;

        debug!(
            workload = %target.name,
            status = %result.status,
            response_time_ms = result.response_time_ms,
            "Health probe finished"
        );
        result
    }

    async fn check_paths(&self, target: &ProbeTarget) -> HealthCheckResult {
        let mut answered = false;
        let mut last_error = None;

        for path in &self.paths {
            let url = format!("http://{}:{}{path}", self.host, target.port);
            match self
                .client
                .get(&url)
                .timeout(self.probe_timeout)
                .send()
                .await
            {
                Ok(response) if response.status() == StatusCode::NOT_FOUND => answered = true,
                Ok(response) => return interpret(&target.name, response).await,
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        if answered {
            HealthCheckResult::failed(
                &target.name,
                WorkloadStatus::Unhealthy,
                "no health endpoint found",
            )
        } else {
            HealthCheckResult::failed(
                &target.name,
                WorkloadStatus::Timeout,
                last_error.unwrap_or_else(|| "no health paths configured".to_string()),
            )
        }
    }

    async fn check_dependencies(
        &self,
        dependencies: &[(String, Option<u16>)],
    ) -> BTreeMap<String, DependencyStatus> {
        let probes = dependencies.iter().map(|(name, port)| async move {
            let status = match port {
                Some(port) => self.check_dependency(*port).await,
                None => DependencyStatus::Unknown,
            };
            (name.clone(), status)
        });
        join_all(probes).await.into_iter().collect()
    }

    async fn check_dependency(&self, port: u16) -> DependencyStatus {
        let url = format!("http://{}:{port}/health", self.host);
        match self
            .client
            .get(&url)
            .timeout(self.dependency_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => DependencyStatus::Connected,
            _ => DependencyStatus::Disconnected,
        }
    }
}

#[async_trait]
impl HealthProbe for HealthChecker {
    async fn probe(&self, target: &ProbeTarget) -> HealthCheckResult {
        self.check(target).await
    }
}

async fn interpret(workload: &str, response: Response) -> HealthCheckResult {
    let code = response.status();
    match code {
        StatusCode::OK | StatusCode::NO_CONTENT => {
            let payload = response.json::<HealthPayload>().await.unwrap_or_default();
            let degraded = payload
                .status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case("degraded"));
            let status = if degraded {
                WorkloadStatus::Degraded
            } else {
                WorkloadStatus::Healthy
            };

            HealthCheckResult {
                uptime_secs: payload.uptime,
                memory: payload.memory.map(PayloadMemory::into_stats),
                cpu: payload.cpu,
                error: payload.error,
                ..HealthCheckResult::new(workload, status, 0)
            }
        }
        StatusCode::TOO_MANY_REQUESTS => HealthCheckResult::failed(
            workload,
            WorkloadStatus::Degraded,
            "HTTP 429: rate limited",
        ),
        other => HealthCheckResult::failed(
            workload,
            WorkloadStatus::Unhealthy,
            format!("HTTP {}", other.as_u16()),
        ),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    async fn serve(router: Router) -> std::io::Result<u16> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(port)
    }

    async fn unused_port() -> std::io::Result<u16> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr().map(|addr| addr.port())
    }

    fn checker() -> Result<HealthChecker> {
        HealthChecker::new(&HealthConfig::for_testing())
    }

    fn target(port: u16) -> ProbeTarget {
        ProbeTarget {
            name: "core".to_string(),
            port,
            dependencies: Vec::new(),
        }
    }

    #[tokio::test]
    async fn given_ok_response_when_checked_then_payload_is_parsed() -> TestResult {
        // GIVEN: A workload reporting uptime and memory
        let port = serve(Router::new().route(
            "/health",
            get(|| async {
                axum::Json(serde_json::json!({
                    "status": "ok",
                    "uptime": 12.5,
                    "memory": { "used": 25.0, "total": 100.0 },
                    "cpu": 3.5
                }))
            }),
        ))
        .await?;

        // WHEN: It is probed
        let result = checker()?.check(&target(port)).await;

        // THEN: It is healthy and the payload fields are carried over
        assert_eq!(result.status, WorkloadStatus::Healthy);
        assert_eq!(result.uptime_secs, Some(12.5));
        assert_eq!(result.cpu, Some(3.5));
        let memory = result.memory.ok_or("memory missing")?;
        assert_eq!(memory.used, 25);
        assert!((memory.percentage - 25.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[tokio::test]
    async fn test_self_reported_degraded() -> TestResult {
        let port = serve(Router::new().route(
            "/health",
            get(|| async { axum::Json(serde_json::json!({ "status": "degraded" })) }),
        ))
        .await?;

        let result = checker()?.check(&target(port)).await;

        assert_eq!(result.status, WorkloadStatus::Degraded);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_content_is_healthy() -> TestResult {
        let port = serve(Router::new().route("/health", get(|| async { AxumStatus::NO_CONTENT })))
            .await?;

        let result = checker()?.check(&target(port)).await;

        assert_eq!(result.status, WorkloadStatus::Healthy);
        Ok(())
    }

    #[tokio::test]
    async fn test_status_codes_map_to_statuses() -> TestResult {
        let cases = [
            (AxumStatus::SERVICE_UNAVAILABLE, WorkloadStatus::Unhealthy),
            (AxumStatus::TOO_MANY_REQUESTS, WorkloadStatus::Degraded),
            (AxumStatus::INTERNAL_SERVER_ERROR, WorkloadStatus::Unhealthy),
        ];

        for (code, expected) in cases {
            let port = serve(Router::new().route("/health", get(move || async move { code })))
                .await?;
            let result = checker()?.check(&target(port)).await;
            assert_eq!(result.status, expected, "HTTP {code}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_not_found_falls_through_to_next_path() -> TestResult {
        let port = serve(Router::new().route("/status", get(|| async { "ok" }))).await?;

        let result = checker()?.check(&target(port)).await;

        assert_eq!(result.status, WorkloadStatus::Healthy);
        Ok(())
    }

    #[tokio::test]
    async fn test_every_path_not_found_is_unhealthy() -> TestResult {
        let port = serve(Router::new()).await?;

        let result = checker()?.check(&target(port)).await;

        assert_eq!(result.status, WorkloadStatus::Unhealthy);
        assert_eq!(result.error.as_deref(), Some("no health endpoint found"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_workload_times_out() -> TestResult {
        let port = unused_port().await?;

        let result = checker()?.check(&target(port)).await;

        assert_eq!(result.status, WorkloadStatus::Timeout);
        assert!(result.error.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_dependency_connectivity_map() -> TestResult {
        let healthy = serve(Router::new().route("/health", get(|| async { "ok" }))).await?;
        let down = unused_port().await?;
        let probe_target = ProbeTarget {
            name: "gateway".to_string(),
            port: healthy,
            dependencies: vec![
                ("core".to_string(), Some(healthy)),
                ("cache".to_string(), Some(down)),
                ("ghost".to_string(), None),
            ],
        };

        let result = checker()?.check(&probe_target).await;

        assert_eq!(result.dependencies.get("core"), Some(&DependencyStatus::Connected));
        assert_eq!(
            result.dependencies.get("cache"),
            Some(&DependencyStatus::Disconnected)
        );
        assert_eq!(result.dependencies.get("ghost"), Some(&DependencyStatus::Unknown));
        Ok(())
    }
}
