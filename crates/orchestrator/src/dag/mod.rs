//! # Dependency graph
//!
//! Directed graph of workload dependencies using petgraph. Edges point from
//! a dependency to its dependent, so a topological layering yields launch
//! phases: phase(X) is the smallest index greater than the phase of every
//! dependency of X.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod resolver;

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Serialize, Serializer};
use warden_core::{Error, Result, ValidationResult, WorkloadMetadata};

pub use resolver::DependencyResolver;

/// One "depends-on" relationship, pointing from dependency to dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub from: String,
    pub to: String,
    pub required: bool,
}

/// A declared dependency on a workload that is not registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DanglingDependency {
    pub workload: String,
    pub missing: String,
}

/// Serializable view of a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<String>,
    pub edges: Vec<DependencyEdge>,
    pub phases: BTreeMap<usize, Vec<String>>,
    pub dangling: Vec<DanglingDependency>,
    pub cyclic: bool,
}

/// Workload dependency graph with its launch phases.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<String, bool>,
    node_map: HashMap<String, NodeIndex>,
    phases: BTreeMap<usize, Vec<String>>,
    dangling: Vec<DanglingDependency>,
    cyclic: bool,
}

impl DependencyGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of workloads and compute its phases.
    ///
    /// Dependencies on unknown workloads are recorded as dangling and get no
    /// edge. A cycle does not stop the layering: the nodes left over go into
    /// one final phase and the graph is flagged cyclic.
    #[must_use]
    pub fn build(metadata: &BTreeMap<String, WorkloadMetadata>) -> Self {
        let mut graph = Self::new();
        for name in metadata.keys() {
            graph.insert_node(name);
        }

        for (name, workload) in metadata {
            for dependency in &workload.dependencies {
                if graph.add_dependency(name, dependency).is_err() {
                    graph.dangling.push(DanglingDependency {
                        workload: name.clone(),
                        missing: dependency.clone(),
                    });
                }
            }
        }

        graph.compute_phases();
        graph
    }

    /// Add a workload node.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateWorkload` if the node already exists.
    pub fn add_node(&mut self, name: &str) -> Result<()> {
        if self.node_map.contains_key(name) {
            return Err(Error::duplicate_workload(name));
        }
        self.insert_node(name);
        Ok(())
    }

    /// Record that `dependent` depends on `dependency`. Repeated
    /// declarations collapse into one edge.
    ///
    /// # Errors
    ///
    /// Returns `WorkloadNotFound` if either node is missing.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        let to = self.index_of(dependent)?;
        let from = self.index_of(dependency)?;
        self.graph.update_edge(from, to, true);
        Ok(())
    }

    /// Workload names, sorted.
    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.node_map.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Edges, sorted by (from, to).
    #[must_use]
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .edge_references()
            .filter_map(|edge| {
                let from = self.graph.node_weight(edge.source())?;
                let to = self.graph.node_weight(edge.target())?;
                Some(DependencyEdge {
                    from: from.clone(),
                    to: to.clone(),
                    required: *edge.weight(),
                })
            })
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        edges
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Phase index to the names launched in that phase.
    #[must_use]
    pub const fn phases(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.phases
    }

    /// Phases as an ordered list of name lists.
    #[must_use]
    pub fn launch_order(&self) -> Vec<Vec<String>> {
        self.phases.values().cloned().collect()
    }

    /// Phase a workload was assigned to.
    #[must_use]
    pub fn phase_of(&self, name: &str) -> Option<usize> {
        self.phases
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == name))
            .map(|(phase, _)| *phase)
    }

    /// Dependencies that name unregistered workloads.
    #[must_use]
    pub fn dangling(&self) -> &[DanglingDependency] {
        &self.dangling
    }

    /// Whether layering hit a cycle.
    #[must_use]
    pub const fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    /// Declared dependencies of `name` that exist in the graph.
    #[must_use]
    pub fn direct_dependencies(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Workloads that declare `name` as a dependency.
    #[must_use]
    pub fn direct_dependents(&self, name: &str) -> Vec<String> {
        self.neighbors(name, Direction::Outgoing)
    }

    /// Transitive dependencies of `name`, breadth first.
    #[must_use]
    pub fn all_dependencies(&self, name: &str) -> Vec<String> {
        self.closure(name, Direction::Incoming)
    }

    /// Transitive dependents of `name`, breadth first.
    #[must_use]
    pub fn all_dependents(&self, name: &str) -> Vec<String> {
        self.closure(name, Direction::Outgoing)
    }

    /// Whether `dependent` transitively depends on `dependency`.
    #[must_use]
    pub fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        self.all_dependencies(dependent)
            .iter()
            .any(|name| name == dependency)
    }

    /// Every dependency cycle as a closed path, e.g. `["a", "b", "a"]`.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut marks: HashMap<NodeIndex, Mark> = HashMap::new();
        let mut stack = Vec::new();
        let mut cycles = Vec::new();

        for start in self.sorted_indices(self.graph.node_indices()) {
            if !marks.contains_key(&start) {
                self.visit(start, &mut marks, &mut stack, &mut cycles);
            }
        }
        cycles
    }

    /// Check the graph: cycles and dangling references are errors, isolated
    /// workloads are warnings.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        let mut errors: Vec<String> = self
            .find_cycles()
            .iter()
            .map(|cycle| format!("circular dependency: {}", cycle.join(" -> ")))
            .collect();
        errors.extend(self.dangling.iter().map(|dangling| {
            format!(
                "unknown dependency: {} depends on {}",
                dangling.workload, dangling.missing
            )
        }));

        let warnings = self
            .sorted_indices(self.graph.node_indices())
            .into_iter()
            .filter(|index| {
                self.graph
                    .neighbors_undirected(*index)
                    .next()
                    .is_none()
            })
            .filter_map(|index| self.graph.node_weight(index))
            .map(|name| format!("isolated workload: {name} has no dependencies or dependents"))
            .collect();

        ValidationResult::new(errors, warnings)
    }

    /// Graphviz rendering, nodes labelled with their phase.
    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut dot = String::from("digraph dependencies {\n    rankdir=LR;\n");
        for name in self.nodes() {
            let label = self
                .phase_of(&name)
                .map_or_else(|| name.clone(), |phase| format!("{name}\\nphase {phase}"));
            let _ = writeln!(dot, "    \"{name}\" [label=\"{label}\"];");
        }
        for edge in self.edges() {
            let _ = writeln!(dot, "    \"{}\" -> \"{}\";", edge.from, edge.to);
        }
        dot.push_str("}\n");
        dot
    }

    /// Serializable view with nodes, edges and phases.
    #[must_use]
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.nodes(),
            edges: self.edges(),
            phases: self.phases.clone(),
            dangling: self.dangling.clone(),
            cyclic: self.cyclic,
        }
    }

    fn insert_node(&mut self, name: &str) {
        let index = self.graph.add_node(name.to_string());
        self.node_map.insert(name.to_string(), index);
    }

    fn index_of(&self, name: &str) -> Result<NodeIndex> {
        self.node_map
            .get(name)
            .copied()
            .ok_or_else(|| Error::workload_not_found(name))
    }

    /// Kahn layering. Every round places at least one node, so it ends
    /// within `node_count` rounds; leftovers form a cycle.
    fn compute_phases(&mut self) {
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|index| {
                let degree = self
                    .graph
                    .neighbors_directed(index, Direction::Incoming)
                    .count();
                (index, degree)
            })
            .collect();

        let mut phases = BTreeMap::new();
        let mut phase = 0;
        loop {
            let ready: Vec<NodeIndex> = in_degree
                .iter()
                .filter(|(_, degree)| **degree == 0)
                .map(|(index, _)| *index)
                .collect();
            if ready.is_empty() {
                break;
            }

            for index in &ready {
                in_degree.remove(index);
                for dependent in self.graph.neighbors_directed(*index, Direction::Outgoing) {
                    if let Some(degree) = in_degree.get_mut(&dependent) {
                        *degree = degree.saturating_sub(1);
                    }
                }
            }
            phases.insert(phase, self.sorted_names(ready));
            phase += 1;
        }

        self.cyclic = !in_degree.is_empty();
        if self.cyclic {
            phases.insert(phase, self.sorted_names(in_degree.into_keys()));
        }
        self.phases = phases;
    }

    fn visit(
        &self,
        index: NodeIndex,
        marks: &mut HashMap<NodeIndex, Mark>,
        stack: &mut Vec<NodeIndex>,
        cycles: &mut Vec<Vec<String>>,
    ) {
        marks.insert(index, Mark::InProgress);
        stack.push(index);

        let dependencies = self.sorted_indices(
            self.graph
                .neighbors_directed(index, Direction::Incoming),
        );
        for dependency in dependencies {
            match marks.get(&dependency).copied() {
                None => self.visit(dependency, marks, stack, cycles),
                Some(Mark::InProgress) => {
                    if let Some(position) = stack.iter().position(|i| *i == dependency) {
                        let mut cycle: Vec<String> = stack[position..]
                            .iter()
                            .filter_map(|i| self.graph.node_weight(*i).cloned())
                            .collect();
                        if let Some(name) = self.graph.node_weight(dependency) {
                            cycle.push(name.clone());
                        }
                        cycles.push(cycle);
                    }
                }
                Some(Mark::Done) => {}
            }
        }

        stack.pop();
        marks.insert(index, Mark::Done);
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<String> {
        self.node_map.get(name).map_or_else(Vec::new, |index| {
            self.sorted_names(self.graph.neighbors_directed(*index, direction))
        })
    }

    fn closure(&self, name: &str, direction: Direction) -> Vec<String> {
        let Some(start) = self.node_map.get(name).copied() else {
            return Vec::new();
        };

        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();
        while let Some(index) = queue.pop_front() {
            for next in self.sorted_indices(self.graph.neighbors_directed(index, direction)) {
                if seen.insert(next) {
                    if let Some(name) = self.graph.node_weight(next) {
                        found.push(name.clone());
                    }
                    queue.push_back(next);
                }
            }
        }
        found
    }

    fn sorted_indices(&self, indices: impl Iterator<Item = NodeIndex>) -> Vec<NodeIndex> {
        let mut indices: Vec<NodeIndex> = indices.collect();
        indices.sort_by(|a, b| self.graph.node_weight(*a).cmp(&self.graph.node_weight(*b)));
        indices.dedup();
        indices
    }

    fn sorted_names(&self, indices: impl IntoIterator<Item = NodeIndex>) -> Vec<String> {
        let mut names: Vec<String> = indices
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index).cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

impl Serialize for DependencyGraph {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workloads(specs: &[(&str, &[&str])]) -> BTreeMap<String, WorkloadMetadata> {
        specs
            .iter()
            .map(|(name, deps)| {
                (
                    (*name).to_string(),
                    WorkloadMetadata::new(*name, 4000).with_dependencies(deps.iter().copied()),
                )
            })
            .collect()
    }

    #[test]
    fn given_diamond_dependencies_when_built_then_phases_follow_depth() {
        // GIVEN: B depends on A; C depends on A and B
        let metadata = workloads(&[("A", &[]), ("B", &["A"]), ("C", &["A", "B"])]);

        // WHEN: The graph is built
        let graph = DependencyGraph::build(&metadata);

        // THEN: Each workload lands one phase after its deepest dependency
        assert_eq!(graph.phases().get(&0), Some(&vec!["A".to_string()]));
        assert_eq!(graph.phases().get(&1), Some(&vec!["B".to_string()]));
        assert_eq!(graph.phases().get(&2), Some(&vec!["C".to_string()]));
        assert_eq!(graph.edge_count(), 3);
        assert!(graph.validate().valid);
    }

    #[test]
    fn given_two_node_cycle_when_built_then_layering_terminates_and_validation_fails() {
        // GIVEN: X and Y depend on each other
        let metadata = workloads(&[("X", &["Y"]), ("Y", &["X"])]);

        // WHEN: The graph is built and validated
        let graph = DependencyGraph::build(&metadata);
        let validation = graph.validate();

        // THEN: Both end up in one final phase and the cycle is named
        assert!(graph.is_cyclic());
        assert_eq!(
            graph.launch_order(),
            vec![vec!["X".to_string(), "Y".to_string()]]
        );
        assert!(!validation.valid);
        assert_eq!(
            validation.errors,
            vec!["circular dependency: X -> Y -> X".to_string()]
        );
    }

    #[test]
    fn test_cycle_behind_healthy_prefix_keeps_earlier_phases() {
        let metadata = workloads(&[("base", &[]), ("p", &["base", "q"]), ("q", &["p"])]);

        let graph = DependencyGraph::build(&metadata);

        assert_eq!(graph.phases().get(&0), Some(&vec!["base".to_string()]));
        assert_eq!(
            graph.phases().get(&1),
            Some(&vec!["p".to_string(), "q".to_string()])
        );
        assert!(graph.is_cyclic());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = DependencyGraph::build(&workloads(&[("loop", &["loop"])]));

        assert_eq!(graph.find_cycles(), vec![vec!["loop".to_string(), "loop".to_string()]]);
    }

    #[test]
    fn test_dangling_dependency_is_reported_without_an_edge() {
        let graph = DependencyGraph::build(&workloads(&[("gateway", &["core"])]));
        let validation = graph.validate();

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.dangling().len(), 1);
        assert_eq!(graph.phase_of("gateway"), Some(0));
        assert_eq!(
            validation.errors,
            vec!["unknown dependency: gateway depends on core".to_string()]
        );
    }

    #[test]
    fn test_isolated_workloads_are_warnings() {
        let graph = DependencyGraph::build(&workloads(&[("a", &[]), ("b", &["c"]), ("c", &[])]));
        let validation = graph.validate();

        assert!(validation.valid);
        assert_eq!(validation.warnings.len(), 1);
        assert!(validation.warnings[0].contains("isolated workload: a"));
    }

    #[test]
    fn test_transitive_queries() {
        let graph = DependencyGraph::build(&workloads(&[
            ("db", &[]),
            ("core", &["db"]),
            ("api", &["core"]),
            ("web", &["api"]),
        ]));

        assert_eq!(
            graph.all_dependencies("web"),
            vec!["api".to_string(), "core".to_string(), "db".to_string()]
        );
        assert_eq!(
            graph.all_dependents("db"),
            vec!["core".to_string(), "api".to_string(), "web".to_string()]
        );
        assert_eq!(graph.direct_dependencies("api"), vec!["core".to_string()]);
        assert_eq!(graph.direct_dependents("api"), vec!["web".to_string()]);
        assert!(graph.depends_on("web", "db"));
        assert!(!graph.depends_on("db", "web"));
        assert!(graph.all_dependencies("ghost").is_empty());
    }

    #[test]
    fn test_repeated_dependency_is_one_edge() {
        let graph = DependencyGraph::build(&workloads(&[("a", &[]), ("b", &["a", "a"])]));
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.phase_of("b"), Some(1));
    }

    #[test]
    fn test_add_node_and_dependency_errors() -> Result<()> {
        let mut graph = DependencyGraph::new();
        graph.add_node("a")?;

        assert!(matches!(graph.add_node("a"), Err(Error::DuplicateWorkload { .. })));
        assert!(graph.add_dependency("a", "missing").is_err_and(|e| e.is_not_found()));
        Ok(())
    }

    #[test]
    fn test_dot_export_lists_nodes_and_edges() {
        let graph = DependencyGraph::build(&workloads(&[("core", &[]), ("gateway", &["core"])]));

        let dot = graph.to_dot();

        assert!(dot.starts_with("digraph dependencies {"));
        assert!(dot.contains("\"core\" [label=\"core\\nphase 0\"];"));
        assert!(dot.contains("\"core\" -> \"gateway\";"));
    }

    #[test]
    fn test_graph_serializes_as_snapshot() -> std::result::Result<(), serde_json::Error> {
        let graph = DependencyGraph::build(&workloads(&[("core", &[]), ("gateway", &["core"])]));

        let json = serde_json::to_value(&graph)?;

        assert_eq!(json["nodes"], serde_json::json!(["core", "gateway"]));
        assert_eq!(json["edges"][0]["from"], "core");
        assert_eq!(json["phases"]["1"], serde_json::json!(["gateway"]));
        assert_eq!(json["cyclic"], false);
        Ok(())
    }
}
