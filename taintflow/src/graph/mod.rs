//! Call graph, override graph and the dependency graph driving the
//! interprocedural fixpoint.

/// Static resolution of call sites to candidate callees.
pub mod call_graph;
/// Dependency graph: strongly connected components and pruning.
pub mod dependencies;
/// Method override recording and collapse.
pub mod overrides;

pub use call_graph::{CallSites, CallTarget, CalleeSet, DefineCallGraphBuilder};
pub use dependencies::DependencyGraph;
pub use overrides::OverrideGraph;
