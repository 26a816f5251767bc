//! Monitoring and healing events for Warden.
//!
//! - **Event types**: lifecycle, health, healing and failure notifications
//! - **Event bus**: bounded broadcast pub/sub with a subscriber cap
//!
//! # Example
//!
//! ```ignore
//! use warden_events::{EventBus, EventPattern, OrchestratorEvent};
//!
//! let bus = EventBus::default();
//! let mut failures = bus.subscribe_filtered(EventPattern::Failures)?;
//! bus.publish(OrchestratorEvent::failure("core", WorkloadStatus::Timeout, "no response"));
//! let event = failures.recv().await;
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod bus;
pub mod event;

pub use bus::{EventBus, EventPattern, EventSubscription};
pub use event::{MonitoringEvent, MonitoringEventKind, OrchestratorEvent};
