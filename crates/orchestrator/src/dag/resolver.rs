//! Dependency resolver.
//!
//! Owns the current [`DependencyGraph`] and rebuilds it whenever discovery
//! changes the registered workloads. Readers get an `Arc` snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};
use warden_core::{ValidationResult, WorkloadMetadata};

use super::DependencyGraph;

#[derive(Debug, Default)]
pub struct DependencyResolver {
    graph: RwLock<Arc<DependencyGraph>>,
}

impl DependencyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the graph from the given workloads and make it current.
    pub fn rebuild(&self, metadata: &BTreeMap<String, WorkloadMetadata>) -> Arc<DependencyGraph> {
        let graph = Arc::new(DependencyGraph::build(metadata));
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            phases = graph.phases().len(),
            "Dependency graph built"
        );
        if graph.is_cyclic() {
            warn!("Dependency graph contains a cycle");
        }

        *self.graph.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&graph);
        graph
    }

    /// Current graph.
    #[must_use]
    pub fn graph(&self) -> Arc<DependencyGraph> {
        Arc::clone(&self.graph.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Phases in launch order.
    #[must_use]
    pub fn launch_order(&self) -> Vec<Vec<String>> {
        self.graph().launch_order()
    }

    #[must_use]
    pub fn all_dependencies(&self, name: &str) -> Vec<String> {
        self.graph().all_dependencies(name)
    }

    #[must_use]
    pub fn all_dependents(&self, name: &str) -> Vec<String> {
        self.graph().all_dependents(name)
    }

    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        self.graph().validate()
    }
}
