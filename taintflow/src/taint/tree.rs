//! Taint trees and environments.

use std::collections::BTreeMap;

use crate::access_path::{PathLabel, Root};
use crate::domains::{AbstractDomain, PathTree};

use super::domain::Taint;
use super::features::SimpleFeature;
use super::kinds::{SinkKind, SourceKind, TaintKind};

/// Source taint at one program point.
pub type ForwardTaint = Taint<SourceKind>;
/// Sink taint at one program point.
pub type BackwardTaint = Taint<SinkKind>;
/// A tree of source taint keyed by access path.
pub type ForwardTaintTree = PathTree<ForwardTaint>;
/// A tree of sink taint keyed by access path.
pub type BackwardTaintTree = PathTree<BackwardTaint>;

/// Collapses a tree and keeps only the given kind's taint.
#[must_use]
pub fn filter_by_leaf<K: TaintKind>(kind: &K, tree: &PathTree<Taint<K>>) -> Taint<K> {
    let mut collapsed = tree.collapse();
    collapsed.retain_kinds(|candidate| candidate == kind);
    collapsed
}

/// Applies a call-site transform to every tip of a tree, keeping each
/// tip's path in the recorded trace.
#[must_use]
pub fn apply_call_to_tree<K: TaintKind>(
    tree: &PathTree<Taint<K>>,
    location: crate::utils::Location,
    callees: &[crate::target::Target],
    port: &Root,
    max_trace_length: u32,
) -> PathTree<Taint<K>> {
    let mut result = PathTree::bottom();
    tree.fold_tips(&mut |path, tip| {
        let path: crate::access_path::AccessPath = path.iter().cloned().collect();
        let applied = tip.apply_call(location, callees, port, &path, max_trace_length);
        result.join_at(&path, &PathTree::leaf(applied));
    });
    result
}

/// A finite map from root to taint tree: the per-callable state of the
/// forward analysis (sources reaching each point) or backward analysis
/// (sinks reachable from each root).
#[derive(Debug, Clone, PartialEq)]
pub struct TaintEnvironment<K: TaintKind> {
    roots: BTreeMap<Root, PathTree<Taint<K>>>,
}

impl<K: TaintKind> Default for TaintEnvironment<K> {
    fn default() -> Self {
        Self {
            roots: BTreeMap::new(),
        }
    }
}

impl<K: TaintKind> TaintEnvironment<K> {
    /// The empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The tree stored at a root, or bottom.
    #[must_use]
    pub fn read_root(&self, root: &Root) -> PathTree<Taint<K>> {
        self.roots.get(root).cloned().unwrap_or_default()
    }

    /// Reads the subtree at `root` + `path`, ancestors included.
    #[must_use]
    pub fn read(&self, root: &Root, path: &[PathLabel]) -> PathTree<Taint<K>> {
        self.roots
            .get(root)
            .map(|tree| tree.read_tree(path))
            .unwrap_or_default()
    }

    /// Strong update of the tree at `root` + `path`.
    pub fn assign(&mut self, root: &Root, path: &[PathLabel], tree: PathTree<Taint<K>>) {
        if path.is_empty() {
            if tree.is_bottom() {
                self.roots.remove(root);
            } else {
                self.roots.insert(root.clone(), tree);
            }
            return;
        }
        let slot = self.roots.entry(root.clone()).or_default();
        slot.assign(path, tree);
        if slot.is_bottom() {
            self.roots.remove(root);
        }
    }

    /// Weak update: joins the tree into `root` + `path`.
    pub fn join_at(&mut self, root: &Root, path: &[PathLabel], tree: &PathTree<Taint<K>>) {
        if tree.is_bottom() {
            return;
        }
        self.roots
            .entry(root.clone())
            .or_default()
            .join_at(path, tree);
    }

    /// Removes a root entirely (strong kill).
    pub fn remove(&mut self, root: &Root) -> Option<PathTree<Taint<K>>> {
        self.roots.remove(root)
    }

    /// Whether the root holds any taint.
    #[must_use]
    pub fn contains(&self, root: &Root) -> bool {
        self.roots.contains_key(root)
    }

    /// Iterates `(root, tree)` pairs in root order.
    pub fn iter(&self) -> impl Iterator<Item = (&Root, &PathTree<Taint<K>>)> {
        self.roots.iter()
    }

    /// The roots with taint, in order.
    pub fn roots(&self) -> impl Iterator<Item = &Root> {
        self.roots.keys()
    }

    /// Number of roots with taint.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether no root holds taint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Keeps only roots accepted by the predicate.
    pub fn retain_roots(&mut self, mut keep: impl FnMut(&Root) -> bool) {
        self.roots.retain(|root, _| keep(root));
    }

    /// Rewrites every tree in place, dropping roots that become bottom.
    pub fn transform_trees(&mut self, transform: impl Fn(&mut PathTree<Taint<K>>)) {
        for tree in self.roots.values_mut() {
            transform(tree);
        }
        self.roots.retain(|_, tree| !tree.is_bottom());
    }

    /// Widens against `other`, then bounds every tree: subtrees deeper
    /// than `max_depth` collapse upward (their taint marked as broadened)
    /// and call-site traces are capped at `max_trace_length`.
    pub fn widen_with(&mut self, other: &Self, max_depth: usize, max_trace_length: u32) {
        self.join(other);
        self.transform_trees(|tree| {
            tree.collapse_to_depth(max_depth, &|taint| {
                taint.add_feature(&SimpleFeature::Broadening);
            });
            tree.transform_tips(&|taint| {
                taint.transform_flows(|_, flow| flow.cap_trace_length(max_trace_length));
            });
        });
    }
}

impl<K: TaintKind> AbstractDomain for TaintEnvironment<K> {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.roots.is_empty()
    }

    fn join(&mut self, other: &Self) {
        for (root, tree) in &other.roots {
            match self.roots.get_mut(root) {
                Some(existing) => existing.join(tree),
                None => {
                    self.roots.insert(root.clone(), tree.clone());
                }
            }
        }
    }

    fn less_or_equal(&self, other: &Self) -> bool {
        self.roots.iter().all(|(root, tree)| {
            other
                .roots
                .get(root)
                .is_some_and(|other_tree| tree.less_or_equal(other_tree))
        })
    }
}
