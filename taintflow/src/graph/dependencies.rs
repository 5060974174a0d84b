//! The dependency graph scheduled by the fixpoint.
//!
//! Nodes are analyzable targets; an edge `caller -> callee` means the
//! caller's re-analysis reads the callee's model. Override targets depend
//! on their members. Strongly connected components give the bottom-up
//! scheduling order; reachability from the entry callables prunes dead
//! targets.

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::target::Target;

/// The combined call ∪ override dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<Target, ()>,
    indices: FxHashMap<Target, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures a node exists for the target.
    pub fn add_target(&mut self, target: &Target) -> NodeIndex {
        if let Some(index) = self.indices.get(target) {
            return *index;
        }
        let index = self.graph.add_node(target.clone());
        self.indices.insert(target.clone(), index);
        index
    }

    /// Records that analyzing `caller` reads `callee`'s model.
    pub fn add_dependency(&mut self, caller: &Target, callee: &Target) {
        let caller_index = self.add_target(caller);
        let callee_index = self.add_target(callee);
        if !self.graph.contains_edge(caller_index, callee_index) {
            self.graph.add_edge(caller_index, callee_index, ());
        }
    }

    /// Whether the target is known to the graph.
    #[must_use]
    pub fn contains(&self, target: &Target) -> bool {
        self.indices.contains_key(target)
    }

    /// The targets whose models `target` reads.
    #[must_use]
    pub fn callees_of(&self, target: &Target) -> Vec<Target> {
        let Some(index) = self.indices.get(target) else {
            return Vec::new();
        };
        let mut callees: Vec<Target> = self
            .graph
            .neighbors_directed(*index, petgraph::Direction::Outgoing)
            .map(|neighbor| self.graph[neighbor].clone())
            .collect();
        callees.sort();
        callees
    }

    /// The targets that read `target`'s model (re-analyzed when the model
    /// grows).
    #[must_use]
    pub fn callers_of(&self, target: &Target) -> Vec<Target> {
        let Some(index) = self.indices.get(target) else {
            return Vec::new();
        };
        let mut callers: Vec<Target> = self
            .graph
            .neighbors_directed(*index, petgraph::Direction::Incoming)
            .map(|neighbor| self.graph[neighbor].clone())
            .collect();
        callers.sort();
        callers
    }

    /// Strongly connected components in bottom-up order: every component
    /// is scheduled after the components it depends on.
    #[must_use]
    pub fn components_bottom_up(&self) -> Vec<Vec<Target>> {
        // Tarjan emits components in reverse topological order of the
        // condensation, which is exactly callees-first.
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .map(|component| {
                let mut targets: Vec<Target> = component
                    .into_iter()
                    .map(|index| self.graph[index].clone())
                    .collect();
                targets.sort();
                targets
            })
            .collect()
    }

    /// Every target reachable from the entries along dependency edges.
    #[must_use]
    pub fn reachable_from(&self, entries: &[Target]) -> FxHashSet<Target> {
        let mut reachable = FxHashSet::default();
        let mut stack: Vec<NodeIndex> = entries
            .iter()
            .filter_map(|target| self.indices.get(target).copied())
            .collect();
        while let Some(index) = stack.pop() {
            if !reachable.insert(self.graph[index].clone()) {
                continue;
            }
            stack.extend(
                self.graph
                    .neighbors_directed(index, petgraph::Direction::Outgoing),
            );
        }
        reachable
    }

    /// All targets, in canonical order.
    #[must_use]
    pub fn all_targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self.indices.keys().cloned().collect();
        targets.sort();
        targets
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
