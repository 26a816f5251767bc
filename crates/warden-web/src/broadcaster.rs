//! Stream broadcaster.
//!
//! Forwards every bus event to the stream channel and pushes a full status
//! update on a fixed interval. Runs until the orchestrator shuts down or the
//! bus closes.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};
use warden_core::Result;

use crate::state::{AppState, StreamMessage, StreamMessageKind};

/// Start the broadcaster task.
///
/// # Errors
///
/// Returns `SubscriberLimit` if the event bus has no room for the listener.
pub fn spawn_broadcaster(state: AppState) -> Result<JoinHandle<()>> {
    let mut events = state.orchestrator.bus().subscribe()?;
    let mut shutdown = state.orchestrator.shutdown_coordinator().subscribe();
    let period = state.config.broadcast_interval().max(Duration::from_millis(1));

    Ok(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        info!(
            interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            "Stream broadcaster started"
        );

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let delivered = state.broadcast(StreamMessage::from_event(&event));
                    debug!(
                        event_type = event.event_type(),
                        workload = %event.workload(),
                        delivered,
                        "Event streamed"
                    );
                }
                _ = ticker.tick() => {
                    if state.broadcast_tx.receiver_count() > 0 {
                        state.broadcast(status_update(&state).await);
                    }
                }
                _ = shutdown.recv() => break,
            }
        }
        debug!("Stream broadcaster exited");
    }))
}

/// Full status snapshot as a stream message.
pub async fn status_update(state: &AppState) -> StreamMessage {
    let status = state.orchestrator.status().await;
    StreamMessage::new(
        StreamMessageKind::StatusUpdate,
        serde_json::to_value(status).unwrap_or(serde_json::Value::Null),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::MasterOrchestrator;
    use orchestrator::testing::{FakeSpawner, ScriptedProbe};
    use std::sync::Arc;
    use warden_core::{ApiConfig, OrchestratorConfig, WorkloadStatus};
    use warden_events::OrchestratorEvent;

    fn state() -> AppState {
        let orchestrator = MasterOrchestrator::new(
            OrchestratorConfig::for_testing(),
            FakeSpawner::new(),
            ScriptedProbe::new(WorkloadStatus::Healthy),
        );
        AppState::new(Arc::new(orchestrator), ApiConfig::for_testing())
    }

    #[tokio::test]
    async fn given_stream_client_when_bus_event_published_then_it_is_forwarded() -> Result<()> {
        // GIVEN: A running broadcaster and one stream listener
        let state = state();
        let mut rx = state.broadcast_tx.subscribe();
        let handle = spawn_broadcaster(state.clone())?;

        // WHEN: A failure is published on the bus
        state
            .orchestrator
            .bus()
            .publish(OrchestratorEvent::failure(
                "core",
                WorkloadStatus::Timeout,
                "probe timed out",
            ));

        // THEN: The listener receives it as a service event
        let received = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(message) if message.kind == StreamMessageKind::ServiceEvent => {
                        return Some(message);
                    }
                    Ok(_) => {}
                    Err(_) => return None,
                }
            }
        })
        .await;
        let message = received.ok().flatten();
        assert!(message.is_some_and(|m| m.payload["workload"] == "core"));

        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_periodic_status_updates_reach_clients() -> Result<()> {
        let state = state();
        let mut rx = state.broadcast_tx.subscribe();
        let handle = spawn_broadcaster(state.clone())?;

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;

        assert!(matches!(
            received,
            Ok(Ok(StreamMessage { kind: StreamMessageKind::StatusUpdate, .. }))
        ));
        handle.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_broadcaster_stops_on_shutdown() -> Result<()> {
        let state = state();
        let handle = spawn_broadcaster(state.clone())?;

        state
            .orchestrator
            .shutdown_coordinator()
            .initiate_shutdown(orchestrator::ShutdownSignal::Programmatic)
            .await;

        assert!(tokio::time::timeout(Duration::from_secs(2), handle).await.is_ok());
        Ok(())
    }
}
