//! Event bus for pub/sub between the engine and the API layer.
//!
//! Publishing never blocks: the channel is bounded and a subscriber that falls
//! behind loses its oldest events instead of slowing down the publisher.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};
use warden_core::{EventBusConfig, Error, Result};

use crate::event::OrchestratorEvent;

/// Pattern for filtering events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPattern {
    /// Match all events.
    All,
    /// Match failure events only.
    Failures,
    /// Match events about one workload.
    ByWorkload(String),
}

impl EventPattern {
    /// Check if an event matches this pattern.
    #[must_use]
    pub fn matches(&self, event: &OrchestratorEvent) -> bool {
        match self {
            Self::All => true,
            Self::Failures => matches!(event, OrchestratorEvent::Failure { .. }),
            Self::ByWorkload(name) => event.workload() == name,
        }
    }
}

/// Subscription handle for receiving events.
pub struct EventSubscription {
    receiver: broadcast::Receiver<OrchestratorEvent>,
    pattern: EventPattern,
}

impl EventSubscription {
    /// Receive the next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<OrchestratorEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.pattern.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next matching event that is already queued.
    pub fn try_recv(&mut self) -> Option<OrchestratorEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.pattern.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged, oldest events dropped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Event bus for publishing and subscribing to events.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
    max_subscribers: usize,
}

impl EventBus {
    /// Create a new event bus.
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.capacity.max(1));
        Self {
            sender,
            max_subscribers: config.max_subscribers,
        }
    }

    /// Publish an event, returning how many subscribers will see it.
    pub fn publish(&self, event: OrchestratorEvent) -> usize {
        debug!(
            event_type = event.event_type(),
            workload = event.workload(),
            "Publishing event"
        );
        // No subscribers is not an error
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberLimit` when the configured cap is reached.
    pub fn subscribe(&self) -> Result<EventSubscription> {
        self.subscribe_filtered(EventPattern::All)
    }

    /// Subscribe to events matching a pattern.
    ///
    /// # Errors
    ///
    /// Returns `SubscriberLimit` when the configured cap is reached.
    pub fn subscribe_filtered(&self, pattern: EventPattern) -> Result<EventSubscription> {
        if self.sender.receiver_count() >= self.max_subscribers {
            return Err(Error::SubscriberLimit {
                limit: self.max_subscribers,
            });
        }
        Ok(EventSubscription {
            receiver: self.sender.subscribe(),
            pattern,
        })
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}
