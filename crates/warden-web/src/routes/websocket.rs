//! WebSocket event stream
//!
//! On connect the client gets a full `status_update`. After that it receives
//! every message the broadcaster fans out, and may ask for a fresh status at
//! any time. Unknown or malformed client messages are logged and ignored.

use super::super::broadcaster::status_update;
use super::super::error::{AppError, Result};
use super::super::state::{AppState, ClientMessage, StreamMessage, StreamMessageKind, StreamSlot};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// WebSocket upgrade endpoint
///
/// The client limit is checked before the upgrade, so a full server answers
/// 503 instead of accepting and closing.
pub async fn websocket_handler(
    State(state): State<AppState>,
    ws: std::result::Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response> {
    let slot = state.try_claim_stream_slot().ok_or_else(|| {
        warn!(
            max = state.config.max_stream_clients,
            "Stream client limit reached, refusing connection"
        );
        AppError::ServiceUnavailable(format!(
            "stream client limit reached ({})",
            state.config.max_stream_clients
        ))
    })?;

    match ws {
        Ok(ws) => Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, slot))),
        Err(rejection) => Ok(rejection.into_response()),
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, slot: StreamSlot) {
    info!(clients = state.stream_client_count(), "Stream client connected");
    let (mut sender, mut receiver) = socket.split();
    let mut stream_rx = state.broadcast_tx.subscribe();

    if send_message(&mut sender, &status_update(&state).await)
        .await
        .is_ok()
    {
        loop {
            tokio::select! {
                incoming = receiver.next() => {
                    let reply = match incoming {
                        Some(Ok(Message::Text(text))) => handle_client_text(&text, &state).await,
                        Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                        Some(Ok(_)) => None,
                    };
                    if let Some(reply) = reply {
                        if send_message(&mut sender, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                outgoing = stream_rx.recv() => match outgoing {
                    Ok(message) => {
                        if send_message(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Stream client lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    drop(slot);
    info!(clients = state.stream_client_count(), "Stream client disconnected");
}

/// Reply to one client text frame, if it deserves one.
pub async fn handle_client_text(text: &str, state: &AppState) -> Option<StreamMessage> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Subscribe) => Some(StreamMessage::new(
            StreamMessageKind::StatusUpdate,
            json!({ "subscribed": true }),
        )),
        Ok(ClientMessage::GetStatus) => Some(status_update(state).await),
        Err(e) => {
            debug!(error = %e, message = %text, "Ignoring unrecognised stream message");
            None
        }
    }
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &StreamMessage,
) -> std::result::Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::MasterOrchestrator;
    use orchestrator::testing::{FakeSpawner, ScriptedProbe};
    use std::sync::Arc;
    use warden_core::{ApiConfig, OrchestratorConfig, WorkloadStatus};

    fn state() -> AppState {
        let orchestrator = MasterOrchestrator::new(
            OrchestratorConfig::for_testing(),
            FakeSpawner::new(),
            ScriptedProbe::new(WorkloadStatus::Healthy),
        );
        AppState::new(Arc::new(orchestrator), ApiConfig::for_testing())
    }

    #[tokio::test]
    async fn test_subscribe_is_acknowledged() {
        let state = state();

        let reply = handle_client_text(r#"{"type":"subscribe"}"#, &state).await;

        assert!(reply.is_some_and(|r| r.kind == StreamMessageKind::StatusUpdate
            && r.payload["subscribed"] == true));
    }

    #[tokio::test]
    async fn test_get_status_returns_full_status() {
        let state = state();

        let reply = handle_client_text(r#"{"type":"get_status"}"#, &state).await;

        assert!(reply.is_some_and(|r| r.payload["state"] == "initializing"));
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_ignored() {
        let state = state();

        assert!(handle_client_text("not json", &state).await.is_none());
        assert!(
            handle_client_text(r#"{"type":"restart_everything"}"#, &state)
                .await
                .is_none()
        );
    }
}
