//! Restart protocol selection and backoff.

use std::time::Duration;

use rand::Rng;
use warden_core::{HealingConfig, RestartProtocol, RestartStrategy};

/// Largest random jitter added to exponential backoff, as a fraction.
pub const JITTER_FRACTION: f64 = 0.1;

/// Maps an attempt number to a strategy and a wait.
#[derive(Debug, Clone)]
pub struct RestartProtocolHandler {
    backoff_ms: Vec<u64>,
}

impl Default for RestartProtocolHandler {
    fn default() -> Self {
        Self::new(&HealingConfig::default())
    }
}

impl RestartProtocolHandler {
    #[must_use]
    pub fn new(config: &HealingConfig) -> Self {
        Self {
            backoff_ms: config.backoff_ms.clone(),
        }
    }

    /// Plan attempt `attempt` (1-based) for a workload.
    #[must_use]
    pub fn create_protocol(&self, workload: &str, attempt: u32, reason: &str) -> RestartProtocol {
        RestartProtocol {
            workload: workload.to_string(),
            attempt,
            strategy: RestartStrategy::for_attempt(attempt),
            backoff_ms: self.backoff_ms_for(attempt),
            reason: reason.to_string(),
        }
    }

    /// Table backoff; the last entry is reused past the end of the table.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms_for(attempt))
    }

    /// `base * 2^(attempt - 1)` capped at the last table entry, plus up to
    /// 10% random jitter.
    #[must_use]
    pub fn exponential_backoff(&self, attempt: u32) -> Duration {
        let (Some(&base), Some(&cap)) = (self.backoff_ms.first(), self.backoff_ms.last()) else {
            return Duration::ZERO;
        };
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = base.saturating_mul(1_u64 << exponent).min(cap.max(base));

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let max_jitter = (delay as f64 * JITTER_FRACTION) as u64;
        let jitter = if max_jitter == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_jitter)
        };
        Duration::from_millis(delay.saturating_add(jitter))
    }

    /// Whether this attempt should quarantine instead of restarting.
    #[must_use]
    pub fn should_quarantine(&self, attempt: u32, max_attempts: u32) -> bool {
        attempt >= max_attempts || RestartStrategy::for_attempt(attempt) == RestartStrategy::Quarantine
    }

    #[must_use]
    pub fn should_retry(&self, attempt: u32, max_attempts: u32) -> bool {
        !self.should_quarantine(attempt, max_attempts)
    }

    fn backoff_ms_for(&self, attempt: u32) -> u64 {
        let index = usize::try_from(attempt.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff_ms
            .get(index)
            .or_else(|| self.backoff_ms.last())
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_follows_attempt_number() {
        let handler = RestartProtocolHandler::default();

        let strategies: Vec<RestartStrategy> = (1..=9)
            .map(|attempt| handler.create_protocol("core", attempt, "probe failed").strategy)
            .collect();

        assert_eq!(
            strategies,
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
    fn test_backoff_reuses_last_entry() {
        let handler = RestartProtocolHandler::default();

        assert_eq!(handler.backoff_for(1), Duration::from_secs(1));
        assert_eq!(handler.backoff_for(3), Duration::from_secs(15));
        assert_eq!(handler.backoff_for(5), Duration::from_secs(60));
        assert_eq!(handler.backoff_for(12), Duration::from_secs(60));
        assert_eq!(handler.create_protocol("core", 2, "x").backoff_ms, 5_000);
    }

    #[test]
    fn test_exponential_backoff_is_capped_with_bounded_jitter() {
        let handler = RestartProtocolHandler::default();

        for attempt in 1..=10 {
            let delay = handler.exponential_backoff(attempt).as_millis();
            let expected = (1_000_u128 << (attempt - 1)).min(60_000);
            assert!(delay >= expected, "attempt {attempt}: {delay} < {expected}");
            assert!(delay <= expected + expected / 10, "attempt {attempt}: {delay} too large");
        }
    }

    #[test]
    fn test_quarantine_honours_workload_limit() {
        let handler = RestartProtocolHandler::default();

        assert!(handler.should_retry(2, 5));
        assert!(handler.should_quarantine(5, 5));
        assert!(handler.should_quarantine(8, 100));
        assert!(!handler.should_quarantine(7, 100));
    }

    #[test]
    fn test_empty_table_means_no_wait() {
        let config = HealingConfig {
            backoff_ms: Vec::new(),
            ..HealingConfig::default()
        };
        let handler = RestartProtocolHandler::new(&config);

        assert_eq!(handler.backoff_for(3), Duration::ZERO);
        assert_eq!(handler.exponential_backoff(3), Duration::ZERO);
    }
}
