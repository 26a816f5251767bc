//! Self-healing.
//!
//! - [`circuit_breaker`]: per-workload restart circuit breakers
//! - [`restart`]: attempt number to strategy and backoff
//! - [`history`]: bounded log of remediation steps
//! - [`engine`]: consumes failure events and runs the restart ladder

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod circuit_breaker;
pub mod engine;
pub mod history;
pub mod restart;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot, StateChange};
pub use engine::{HealingOutcome, SelfHealingEngine};
pub use history::{HealingHistory, HealingStats};
pub use restart::RestartProtocolHandler;
