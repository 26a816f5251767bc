//! Remediation vocabulary shared by the healing engine, the event bus and
//! the API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Restarts permitted.
    #[default]
    Closed,
    /// Restarts refused until the reset timeout passes.
    Open,
    /// Probing whether restarts work again.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Remediation strategy chosen from the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartStrategy {
    Immediate,
    Graceful,
    Dependency,
    Quarantine,
}

impl RestartStrategy {
    /// Attempts 1-3 immediate, 4-5 graceful, 6-7 dependency, 8+ quarantine.
    #[must_use]
    pub const fn for_attempt(attempt: u32) -> Self {
        match attempt {
            0..=3 => Self::Immediate,
            4..=5 => Self::Graceful,
            6..=7 => Self::Dependency,
            _ => Self::Quarantine,
        }
    }
}

impl fmt::Display for RestartStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::Graceful => write!(f, "graceful"),
            Self::Dependency => write!(f, "dependency"),
            Self::Quarantine => write!(f, "quarantine"),
        }
    }
}

/// One remediation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartProtocol {
    pub workload: String,
    pub attempt: u32,
    pub strategy: RestartStrategy,
    pub backoff_ms: u64,
    pub reason: String,
}

/// Kind of recorded remediation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealingAction {
    DetectFailure,
    AttemptRestart,
    RestartSuccess,
    RestartFailure,
    Quarantine,
    DependencyRestart,
    CircuitOpen,
    CircuitClose,
}

/// Immutable record of one remediation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingEvent {
    pub timestamp: DateTime<Utc>,
    pub workload: String,
    pub action: HealingAction,
    pub reason: String,
    pub metadata: Map<String, Value>,
}

impl HealingEvent {
    /// Create an event stamped now.
    pub fn new(workload: impl Into<String>, action: HealingAction, reason: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            workload: workload.into(),
            action,
            reason: reason.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_ladder() {
        let ladder: Vec<RestartStrategy> = (1..=9).map(RestartStrategy::for_attempt).collect();
        assert_eq!(
            ladder,
            vec![
                RestartStrategy::Immediate,
                RestartStrategy::Immediate,
                RestartStrategy::Immediate,
                RestartStrategy::Graceful,
                RestartStrategy::Graceful,
                RestartStrategy::Dependency,
                RestartStrategy::Dependency,
                RestartStrategy::Quarantine,
                RestartStrategy::Quarantine,
            ]
        );
    }

    #[test]
    fn test_healing_action_wire_format() -> Result<(), serde_json::Error> {
        let event = HealingEvent::new("core", HealingAction::CircuitOpen, "too many failures")
            .with_metadata("failures", 3);

        let json = serde_json::to_value(&event)?;
        assert_eq!(json["action"], "CIRCUIT_OPEN");
        assert_eq!(json["metadata"]["failures"], 3);
        Ok(())
    }

    #[test]
    fn test_circuit_state_wire_format() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen)?, "\"half-open\"");
        Ok(())
    }
}
