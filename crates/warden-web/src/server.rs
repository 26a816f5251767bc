//! Server setup

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use super::error::Error;
use super::state::AppState;
use super::{create_router, spawn_broadcaster};

/// Bind the configured address, start the stream broadcaster and serve until
/// `shutdown` resolves.
///
/// # Errors
///
/// - `InvalidOrigin` for a bad CORS origin
/// - `Bind` if the address cannot be bound
/// - `Orchestrator` if the broadcaster cannot subscribe to the bus
/// - `Serve` if the server fails while running
pub async fn run_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let address = state.config.bind_address();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Error::Bind {
            address: address.clone(),
            reason: e.to_string(),
        })?;
    let local: SocketAddr = listener.local_addr()?;

    let app = create_router(state.clone())?;
    let broadcaster = spawn_broadcaster(state.clone())?;
    info!(
        address = %local,
        stream = %state.config.websocket_path,
        "Control-plane API listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    broadcaster.abort();
    info!("Control-plane API stopped");
    served.map_err(Error::from)
}
