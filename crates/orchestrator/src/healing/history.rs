//! Bounded log of remediation steps.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use warden_core::{HealingAction, HealingEvent, Result};

/// Totals over the recorded history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealingStats {
    pub total: usize,
    pub by_action: BTreeMap<HealingAction, usize>,
    pub by_workload: BTreeMap<String, usize>,
}

/// Oldest-first event log. When full, the oldest event is dropped.
#[derive(Debug)]
pub struct HealingHistory {
    events: RwLock<VecDeque<HealingEvent>>,
    limit: usize,
}

impl Default for HealingHistory {
    fn default() -> Self {
        Self::new(warden_core::config::DEFAULT_HEALING_HISTORY_LIMIT)
    }
}

impl HealingHistory {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn record(&self, event: HealingEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        while events.len() >= self.limit {
            events.pop_front();
        }
        events.push_back(event);
    }

    #[must_use]
    pub fn all(&self) -> Vec<HealingEvent> {
        self.filtered(|_| true)
    }

    #[must_use]
    pub fn for_workload(&self, workload: &str) -> Vec<HealingEvent> {
        self.filtered(|event| event.workload == workload)
    }

    #[must_use]
    pub fn by_action(&self, action: HealingAction) -> Vec<HealingEvent> {
        self.filtered(|event| event.action == action)
    }

    /// The last `count` events, oldest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<HealingEvent> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    /// Events with `from <= timestamp <= to`.
    #[must_use]
    pub fn in_time_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<HealingEvent> {
        self.filtered(|event| event.timestamp >= from && event.timestamp <= to)
    }

    #[must_use]
    pub fn stats(&self) -> HealingStats {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let mut stats = HealingStats {
            total: events.len(),
            ..HealingStats::default()
        };
        for event in events.iter() {
            *stats.by_action.entry(event.action).or_default() += 1;
            *stats.by_workload.entry(event.workload.clone()).or_default() += 1;
        }
        stats
    }

    /// Drop events older than `age`. Returns how many were removed.
    pub fn clear_older_than(&self, age: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let before = events.len();
        events.retain(|event| event.timestamp >= cutoff);
        before - events.len()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The whole history as a pretty-printed JSON array.
    ///
    /// # Errors
    ///
    /// Returns `JsonFailed` if serialization fails.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.all())?)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&HealingEvent) -> bool) -> Vec<HealingEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| keep(event))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(workload: &str, action: HealingAction) -> HealingEvent {
        HealingEvent::new(workload, action, "test")
    }

    #[test]
    fn test_history_is_bounded_oldest_first() {
        let history = HealingHistory::new(3);

        for action in [
            HealingAction::DetectFailure,
            HealingAction::AttemptRestart,
            HealingAction::RestartFailure,
            HealingAction::Quarantine,
        ] {
            history.record(event("core", action));
        }

        let actions: Vec<HealingAction> = history.all().iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![
                HealingAction::AttemptRestart,
                HealingAction::RestartFailure,
                HealingAction::Quarantine
            ]
        );
        assert_eq!(history.recent(1)[0].action, HealingAction::Quarantine);
        assert_eq!(history.recent(10).len(), 3);
    }

    #[test]
    fn test_queries_and_stats() {
        let history = HealingHistory::new(10);
        history.record(event("core", HealingAction::DetectFailure));
        history.record(event("core", HealingAction::AttemptRestart));
        history.record(event("gateway", HealingAction::DetectFailure));

        let stats = history.stats();

        assert_eq!(history.for_workload("core").len(), 2);
        assert_eq!(history.by_action(HealingAction::DetectFailure).len(), 2);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_action[&HealingAction::DetectFailure], 2);
        assert_eq!(stats.by_workload["gateway"], 1);
    }

    #[test]
    fn test_time_range_and_age_cleanup() {
        let history = HealingHistory::new(10);
        let mut old = event("core", HealingAction::DetectFailure);
        old.timestamp = Utc::now() - chrono::Duration::hours(2);
        history.record(old);
        history.record(event("core", HealingAction::AttemptRestart));

        let last_hour = history.in_time_range(Utc::now() - chrono::Duration::hours(1), Utc::now());
        let removed = history.clear_older_than(Duration::from_secs(3_600));

        assert_eq!(last_hour.len(), 1);
        assert_eq!(removed, 1);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_export_json_and_clear() -> Result<()> {
        let history = HealingHistory::new(10);
        history.record(event("core", HealingAction::CircuitOpen));

        let exported = history.export_json()?;
        history.clear();

        assert!(exported.contains("CIRCUIT_OPEN"));
        assert!(history.is_empty());
        Ok(())
    }
}
