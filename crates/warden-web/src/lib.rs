//! Warden control-plane API
//!
//! REST endpoints and a WebSocket event stream over the master orchestrator,
//! with tower middleware for CORS, tracing and compression.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::panic)]
#![deny(clippy::expect_used)]

use axum::{
    Router,
    http::{HeaderValue, Method},
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub mod broadcaster;
pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use broadcaster::spawn_broadcaster;
pub use error::{AppError, Error, ErrorResponse};
pub use server::run_server;
pub use state::{AppState, ClientMessage, StreamMessage, StreamMessageKind};

/// Build the full application: routes, state and middleware.
///
/// # Errors
///
/// Returns `InvalidOrigin` if a configured CORS origin is not a valid header
/// value.
pub fn create_router(state: AppState) -> Result<Router, Error> {
    info!(origins = ?state.config.cors_origins, "Creating router");
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.cors_origins)?)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let router = routes::create_routes(&state.config.websocket_path)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        );

    Ok(router)
}

/// `*` allows any origin; anything else is an explicit list.
fn allowed_origins(origins: &[String]) -> Result<AllowOrigin, Error> {
    if origins.iter().any(|origin| origin == "*") {
        return Ok(AllowOrigin::any());
    }
    let origins = origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|e| Error::InvalidOrigin {
                    origin: origin.clone(),
                    reason: e.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(AllowOrigin::list(origins))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_list_rejects_invalid_header_values() {
        let origins = vec!["http://localhost:3000".to_string(), "bad\norigin".to_string()];

        let result = allowed_origins(&origins);

        assert!(matches!(result, Err(Error::InvalidOrigin { ref origin, .. }) if origin.starts_with("bad")));
    }

    #[test]
    fn test_wildcard_origin_allows_any() {
        assert!(allowed_origins(&["*".to_string()]).is_ok());
        assert!(allowed_origins(&[]).is_ok());
    }
}
