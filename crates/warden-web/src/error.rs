//! Error handling with RFC 7807 Problem Details for JSON responses

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

pub type Result<T> = std::result::Result<T, AppError>;

/// Media type of problem documents.
pub const PROBLEM_JSON: &str = "application/problem+json";

/// Router construction and server errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid CORS origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },

    #[error("failed to bind {address}: {reason}")]
    Bind { address: String, reason: String },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),

    #[error(transparent)]
    Orchestrator(#[from] warden_core::Error),
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<warden_core::Error> for AppError {
    fn from(err: warden_core::Error) -> Self {
        use warden_core::Error as Core;

        let detail = err.to_string();
        match err {
            Core::WorkloadNotFound { .. } => Self::NotFound(detail),
            Core::Quarantined { .. }
            | Core::DuplicateWorkload { .. }
            | Core::HealingInProgress { .. } => Self::Conflict(detail),
            Core::CircuitOpen { .. } | Core::SubscriberLimit { .. } => {
                Self::ServiceUnavailable(detail)
            }
            _ => Self::Internal(detail),
        }
    }
}

/// RFC 7807 Problem Details for HTTP APIs
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    problem_type: String,
    title: String,
    status: u16,
    detail: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, title: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            problem_type: "about:blank".to_string(),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
        }
    }

    pub fn from_error(err: &AppError) -> Self {
        let status = err.status_code();
        let title = status.canonical_reason().unwrap_or("Error");

        Self::new(status, title, err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(ErrorResponse::from_error(&self))).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROBLEM_JSON),
        );
        response
    }
}
