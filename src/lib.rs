#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # Warden
//!
//! Control plane for a fleet of local workloads. The `warden` binary wires
//! the orchestrator to the HTTP API; this library holds its CLI and tracing
//! setup and re-exports the workspace crates.

pub use orchestrator;
pub use warden_core;
pub use warden_events;
pub use warden_web;

pub mod cli;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins; otherwise `level` is used, falling back to `info` when it
/// is not a valid filter.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
