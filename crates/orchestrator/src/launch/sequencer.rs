//! Launch ordering.

use std::sync::Arc;

use itertools::Itertools;
use warden_core::Priority;

use crate::dag::DependencyResolver;
use crate::registry::Registry;

/// Turns phases into priority-ordered, bounded batches.
#[derive(Debug, Clone)]
pub struct LaunchSequencer {
    registry: Arc<Registry>,
    resolver: Arc<DependencyResolver>,
    parallel_limit: usize,
}

impl LaunchSequencer {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        resolver: Arc<DependencyResolver>,
        parallel_limit: usize,
    ) -> Self {
        Self {
            registry,
            resolver,
            parallel_limit: parallel_limit.max(1),
        }
    }

    /// Phases in launch order, from the resolver.
    #[must_use]
    pub fn calculate_launch_sequence(&self) -> Vec<Vec<String>> {
        self.resolver.launch_order()
    }

    /// Split a phase into batches of at most `parallel_limit` workloads.
    #[must_use]
    pub fn parallel_batches(&self, names: &[String]) -> Vec<Vec<String>> {
        names
            .chunks(self.parallel_limit)
            .map(<[String]>::to_vec)
            .collect()
    }

    /// Stable sort by priority tier, critical first. Unknown names go last.
    pub async fn sort_by_priority(&self, names: &[String]) -> Vec<String> {
        let metadata = self.registry.metadata().await;
        names
            .iter()
            .cloned()
            .sorted_by_key(|name| {
                metadata
                    .get(name)
                    .map_or((1, Priority::Low), |m| (0, m.priority))
            })
            .collect()
    }
}
