//! Per-workload circuit breakers.
//!
//! Stops the healing engine from hammering a workload that keeps failing:
//! - Closed: restarts pass through
//! - Open: restarts are refused until the reset timeout passes
//! - Half-Open: restarts are tried again; enough successes close the circuit
//!
//! The open to half-open move happens lazily in [`CircuitBreakerRegistry::is_allowed`]
//! and through a one-shot timer. Both run under the same lock, and the timer
//! carries a generation number so it cannot undo a newer transition.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_core::{CircuitBreakerConfig, CircuitState};

/// Successes in the closed state that wipe earlier failures.
pub const CLOSED_SUCCESS_RESET: u32 = 3;

/// A state transition caused by a recorded result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub workload: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    opened: Option<Instant>,
    opened_at: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    generation: u64,
}

impl CircuitBreaker {
    fn transition(&mut self, to: CircuitState) -> StateChange {
        let change = StateChange {
            from: self.state,
            to,
        };
        self.state = to;
        self.generation = self.generation.wrapping_add(1);
        match to {
            CircuitState::Open => {
                self.opened = Some(Instant::now());
                self.opened_at = Some(Utc::now());
                self.success_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.opened = None;
                self.opened_at = None;
            }
        }
        change
    }

    fn snapshot(&self, workload: &str) -> CircuitSnapshot {
        CircuitSnapshot {
            workload: workload.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure: self.last_failure,
            opened_at: self.opened_at,
        }
    }
}

type Breakers = Arc<Mutex<BTreeMap<String, CircuitBreaker>>>;

/// Circuit breakers keyed by workload name, created on first use.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Breakers,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Record a failed restart. Returns the transition if the circuit moved.
    pub fn record_failure(&self, workload: &str) -> Option<StateChange> {
        let mut breakers = self.lock();
        let breaker = breakers.entry(workload.to_string()).or_default();
        breaker.failure_count = breaker.failure_count.saturating_add(1);
        breaker.success_count = 0;
        breaker.last_failure = Some(Utc::now());

        let trips = match breaker.state {
            CircuitState::Closed => breaker.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if !trips {
            return None;
        }

        let change = breaker.transition(CircuitState::Open);
        let generation = breaker.generation;
        warn!(
            workload = %workload,
            failures = breaker.failure_count,
            reset_timeout_ms = self.config.reset_timeout_ms,
            "Circuit opened"
        );
        drop(breakers);

        self.schedule_half_open(workload, generation);
        Some(change)
    }

    /// Record a successful restart. Returns the transition if the circuit moved.
    pub fn record_success(&self, workload: &str) -> Option<StateChange> {
        let mut breakers = self.lock();
        let breaker = breakers.entry(workload.to_string()).or_default();
        breaker.success_count = breaker.success_count.saturating_add(1);

        match breaker.state {
            CircuitState::HalfOpen if breaker.success_count >= self.config.success_threshold => {
                info!(workload = %workload, "Circuit closed");
                Some(breaker.transition(CircuitState::Closed))
            }
            CircuitState::Closed if breaker.success_count >= CLOSED_SUCCESS_RESET => {
                breaker.failure_count = 0;
                None
            }
            _ => None,
        }
    }

    /// Whether a restart may be attempted now.
    ///
    /// An open circuit whose reset timeout has passed moves to half-open
    /// here and allows the attempt. Unknown workloads are allowed.
    pub fn is_allowed(&self, workload: &str) -> bool {
        let mut breakers = self.lock();
        let Some(breaker) = breakers.get_mut(workload) else {
            return true;
        };
        match breaker.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let expired = breaker
                    .opened
                    .is_none_or(|opened| opened.elapsed() >= self.config.reset_timeout());
                if expired {
                    breaker.transition(CircuitState::HalfOpen);
                    debug!(workload = %workload, "Circuit half-open");
                }
                expired
            }
        }
    }

    /// Current state; closed for unknown workloads.
    #[must_use]
    pub fn state(&self, workload: &str) -> CircuitState {
        self.lock()
            .get(workload)
            .map_or(CircuitState::Closed, |breaker| breaker.state)
    }

    #[must_use]
    pub fn snapshot(&self, workload: &str) -> Option<CircuitSnapshot> {
        self.lock()
            .get(workload)
            .map(|breaker| breaker.snapshot(workload))
    }

    /// Snapshots of every breaker, sorted by workload name.
    #[must_use]
    pub fn all(&self) -> Vec<CircuitSnapshot> {
        self.lock()
            .iter()
            .map(|(name, breaker)| breaker.snapshot(name))
            .collect()
    }

    /// Drop all state for a workload.
    pub fn reset(&self, workload: &str) {
        if self.lock().remove(workload).is_some() {
            info!(workload = %workload, "Circuit reset");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn schedule_half_open(&self, workload: &str, generation: u64) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let breakers = Arc::clone(&self.breakers);
        let reset_timeout = self.config.reset_timeout();
        let workload = workload.to_string();

        runtime.spawn(async move {
            tokio::time::sleep(reset_timeout).await;
            let mut breakers = breakers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(breaker) = breakers.get_mut(&workload) {
                if breaker.state == CircuitState::Open && breaker.generation == generation {
                    breaker.transition(CircuitState::HalfOpen);
                    debug!(workload = %workload, "Circuit half-open after reset timeout");
                }
            }
        });
    }
}
