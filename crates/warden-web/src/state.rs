//! Shared handler state and stream message types.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use orchestrator::MasterOrchestrator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use warden_core::ApiConfig;
use warden_events::OrchestratorEvent;

/// Buffered stream messages per client before it starts lagging.
pub const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Kind of server-to-client stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMessageKind {
    StatusUpdate,
    HealthUpdate,
    HealingEvent,
    ServiceEvent,
}

/// Server-to-client stream message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: StreamMessageKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl StreamMessage {
    pub fn new(kind: StreamMessageKind, payload: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Stream form of a bus event.
    #[must_use]
    pub fn from_event(event: &OrchestratorEvent) -> Self {
        let kind = match event {
            OrchestratorEvent::HealthUpdate { .. } => StreamMessageKind::HealthUpdate,
            OrchestratorEvent::Healing(_) => StreamMessageKind::HealingEvent,
            OrchestratorEvent::Monitoring(_) | OrchestratorEvent::Failure { .. } => {
                StreamMessageKind::ServiceEvent
            }
        };
        Self::new(kind, serde_json::to_value(event).unwrap_or(Value::Null))
    }
}

/// Client-to-server stream message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe,
    GetStatus,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<MasterOrchestrator>,
    pub config: Arc<ApiConfig>,
    /// Fan-out channel feeding every connected stream client
    pub broadcast_tx: broadcast::Sender<StreamMessage>,
    stream_clients: Arc<AtomicUsize>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("stream_clients", &self.stream_client_count())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(orchestrator: Arc<MasterOrchestrator>, config: ApiConfig) -> Self {
        let (broadcast_tx, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        Self {
            orchestrator,
            config: Arc::new(config),
            broadcast_tx,
            stream_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send to every connected stream client. Returns how many received it.
    ///
    /// Never blocks: slow clients lag behind and lose the oldest messages.
    pub fn broadcast(&self, message: StreamMessage) -> usize {
        self.broadcast_tx.send(message).unwrap_or(0)
    }

    #[must_use]
    pub fn stream_client_count(&self) -> usize {
        self.stream_clients.load(Ordering::Acquire)
    }

    /// Claim a stream slot, or `None` when every slot is taken.
    #[must_use]
    pub fn try_claim_stream_slot(&self) -> Option<StreamSlot> {
        let max = self.config.max_stream_clients;
        self.stream_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < max).then_some(count + 1)
            })
            .ok()
            .map(|_| StreamSlot {
                clients: Arc::clone(&self.stream_clients),
            })
    }
}

/// A claimed stream slot, released on drop.
#[derive(Debug)]
pub struct StreamSlot {
    clients: Arc<AtomicUsize>,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.clients.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::testing::{FakeSpawner, ScriptedProbe};
    use warden_core::{HealingAction, HealingEvent, OrchestratorConfig, WorkloadStatus};

    fn state(max_clients: usize) -> AppState {
        let orchestrator = MasterOrchestrator::new(
            OrchestratorConfig::for_testing(),
            FakeSpawner::new(),
            ScriptedProbe::new(WorkloadStatus::Healthy),
        );
        let config = ApiConfig {
            max_stream_clients: max_clients,
            ..ApiConfig::for_testing()
        };
        AppState::new(Arc::new(orchestrator), config)
    }

    #[test]
    fn test_stream_slots_are_capped_and_released() {
        let state = state(2);

        let first = state.try_claim_stream_slot();
        let second = state.try_claim_stream_slot();
        let third = state.try_claim_stream_slot();

        assert!(first.is_some() && second.is_some());
        assert!(third.is_none());
        assert_eq!(state.stream_client_count(), 2);

        drop(first);
        assert_eq!(state.stream_client_count(), 1);
        assert!(state.try_claim_stream_slot().is_some());
    }

    #[test]
    fn test_events_map_to_stream_kinds() {
        let healing = OrchestratorEvent::Healing(HealingEvent::new(
            "core",
            HealingAction::Quarantine,
            "exhausted",
        ));
        let failure = OrchestratorEvent::failure("core", WorkloadStatus::Unhealthy, "probe failed");

        let healing = StreamMessage::from_event(&healing);
        let failure = StreamMessage::from_event(&failure);

        assert_eq!(healing.kind, StreamMessageKind::HealingEvent);
        assert_eq!(healing.payload["action"], "QUARANTINE");
        assert_eq!(failure.kind, StreamMessageKind::ServiceEvent);
    }

    #[test]
    fn test_client_messages_parse_by_type_tag() {
        let subscribe: std::result::Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"subscribe"}"#);
        let status: std::result::Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"get_status"}"#);
        let unknown: std::result::Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"shutdown"}"#);

        assert!(matches!(subscribe, Ok(ClientMessage::Subscribe)));
        assert!(matches!(status, Ok(ClientMessage::GetStatus)));
        assert!(unknown.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_without_clients_is_not_an_error() {
        let state = state(1);
        let mut rx = state.broadcast_tx.subscribe();

        let delivered = state.broadcast(StreamMessage::new(
            StreamMessageKind::StatusUpdate,
            serde_json::json!({ "ok": true }),
        ));
        drop(rx.recv().await);
        drop(rx);
        let dropped = state.broadcast(StreamMessage::new(
            StreamMessageKind::StatusUpdate,
            Value::Null,
        ));

        assert_eq!(delivered, 1);
        assert_eq!(dropped, 0);
    }
}
