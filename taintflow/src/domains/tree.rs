//! Access-path-keyed prefix trees.
//!
//! A [`PathTree`] holds a lattice tip at every node and children keyed by
//! [`PathLabel`]. Reads accumulate ancestor tips (taint on a whole value
//! applies to each of its fields) and respect the `AnyIndex` wildcard in
//! both directions. Trees are bottom-normalized: a subtree equal to bottom
//! is never stored.

use std::collections::BTreeMap;

use crate::access_path::PathLabel;

use super::lattice::AbstractDomain;

/// A prefix tree of lattice elements keyed by access-path labels.
#[derive(Debug, Clone, PartialEq)]
pub struct PathTree<T> {
    tip: T,
    children: BTreeMap<PathLabel, PathTree<T>>,
}

impl<T: AbstractDomain> Default for PathTree<T> {
    fn default() -> Self {
        Self::bottom()
    }
}

impl<T: AbstractDomain> PathTree<T> {
    /// A tree holding a single tip at its root.
    #[must_use]
    pub fn leaf(tip: T) -> Self {
        Self {
            tip,
            children: BTreeMap::new(),
        }
    }

    /// The tip stored at the root of this tree.
    #[must_use]
    pub fn tip(&self) -> &T {
        &self.tip
    }

    /// Joins an element into the root tip.
    pub fn join_tip(&mut self, tip: &T) {
        self.tip.join(tip);
    }

    /// Child subtrees in label order.
    pub fn children(&self) -> impl Iterator<Item = (&PathLabel, &PathTree<T>)> {
        self.children.iter()
    }

    /// Nests this tree under the given path: `prepend([a, b], t)` reads
    /// back from `[a][b]`.
    #[must_use]
    pub fn prepend(self, path: &[PathLabel]) -> Self {
        let mut tree = self;
        for label in path.iter().rev() {
            if tree.is_bottom() {
                return Self::bottom();
            }
            let mut parent = Self::bottom();
            parent.children.insert(label.clone(), tree);
            tree = parent;
        }
        tree
    }

    /// Reads the subtree at `path`. Ancestor tips along the way join into
    /// the result's root tip; wildcard children contribute wherever their
    /// label may match.
    #[must_use]
    pub fn read_tree(&self, path: &[PathLabel]) -> Self {
        let Some((first, rest)) = path.split_first() else {
            return self.clone();
        };
        let mut result = Self::bottom();
        for (label, child) in &self.children {
            if first.matches(label) {
                result.join(&child.read_tree(rest));
            }
        }
        result.tip.join(&self.tip);
        result.normalize();
        result
    }

    /// Reads the element applicable at `path`: the collapse of
    /// [`Self::read_tree`]. `read(&[])` is exactly `collapse()`.
    #[must_use]
    pub fn read(&self, path: &[PathLabel]) -> T {
        self.read_tree(path).collapse()
    }

    /// Reads the subtree at exactly `path`: no ancestor accumulation, no
    /// wildcard matching. Used when enumerating stored ports.
    #[must_use]
    pub fn read_raw(&self, path: &[PathLabel]) -> Self {
        let Some((first, rest)) = path.split_first() else {
            return self.clone();
        };
        match self.children.get(first) {
            Some(child) => child.read_raw(rest),
            None => Self::bottom(),
        }
    }

    /// Strong update: replaces the subtree at `path`. Descending through a
    /// wildcard label degrades to a weak update, since the wildcard stands
    /// for more than one concrete location.
    pub fn assign(&mut self, path: &[PathLabel], tree: Self) {
        let Some((first, rest)) = path.split_first() else {
            *self = tree;
            return;
        };
        if *first == PathLabel::AnyIndex {
            self.join_at(path, &tree);
            return;
        }
        let child = self.children.entry(first.clone()).or_default();
        child.assign(rest, tree);
        self.normalize();
    }

    /// Weak update: joins the tree into the node at `path`.
    pub fn join_at(&mut self, path: &[PathLabel], tree: &Self) {
        if tree.is_bottom() {
            return;
        }
        let Some((first, rest)) = path.split_first() else {
            self.join(tree);
            return;
        };
        let child = self.children.entry(first.clone()).or_default();
        child.join_at(rest, tree);
    }

    /// Joins every tip in the tree into a single element.
    #[must_use]
    pub fn collapse(&self) -> T {
        let mut acc = self.tip.clone();
        for child in self.children.values() {
            acc.join(&child.collapse());
        }
        acc
    }

    /// Folds subtrees deeper than `depth` into the tip at the boundary.
    /// `on_collapse` runs once on each tip produced by folding, letting
    /// callers mark widened taint.
    pub fn collapse_to_depth(&mut self, depth: usize, on_collapse: &impl Fn(&mut T)) {
        if depth == 0 {
            if self.children.is_empty() {
                return;
            }
            let mut folded = T::bottom();
            for child in self.children.values() {
                folded.join(&child.collapse());
            }
            if !folded.is_bottom() {
                on_collapse(&mut folded);
                self.tip.join(&folded);
            }
            self.children.clear();
            return;
        }
        for child in self.children.values_mut() {
            child.collapse_to_depth(depth - 1, on_collapse);
        }
    }

    /// Visits every non-bottom tip with its path, in label order.
    pub fn fold_tips(&self, visit: &mut impl FnMut(&[PathLabel], &T)) {
        let mut path = Vec::new();
        self.fold_tips_inner(&mut path, visit);
    }

    fn fold_tips_inner(&self, path: &mut Vec<PathLabel>, visit: &mut impl FnMut(&[PathLabel], &T)) {
        if !self.tip.is_bottom() {
            visit(path, &self.tip);
        }
        for (label, child) in &self.children {
            path.push(label.clone());
            child.fold_tips_inner(path, visit);
            path.pop();
        }
    }

    /// Rewrites every tip in place, then re-normalizes.
    pub fn transform_tips(&mut self, transform: &impl Fn(&mut T)) {
        transform(&mut self.tip);
        for child in self.children.values_mut() {
            child.transform_tips(transform);
        }
        self.normalize();
    }

    /// Splits the tree by mapping each tip through `project`: tips landing
    /// on the same key are reassembled, at their original paths, into that
    /// key's tree. Tips projected to `None` are dropped.
    #[must_use]
    pub fn partition_tips<Key: Ord>(
        &self,
        project: &impl Fn(&T) -> Vec<(Key, T)>,
    ) -> BTreeMap<Key, Self> {
        let mut partitions: BTreeMap<Key, Self> = BTreeMap::new();
        self.fold_tips(&mut |path, tip| {
            for (key, part) in project(tip) {
                if part.is_bottom() {
                    continue;
                }
                let slot = partitions.entry(key).or_default();
                slot.join_at(path, &PathTree::leaf(part));
            }
        });
        partitions
    }

    /// Maximum depth of any stored tip.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.children
            .values()
            .map(|child| 1 + child.depth())
            .max()
            .unwrap_or(0)
    }

    /// Drops children that became bottom.
    fn normalize(&mut self) {
        self.children.retain(|_, child| !child.is_bottom());
    }
}

impl<T: AbstractDomain> AbstractDomain for PathTree<T> {
    fn bottom() -> Self {
        Self {
            tip: T::bottom(),
            children: BTreeMap::new(),
        }
    }

    fn is_bottom(&self) -> bool {
        self.tip.is_bottom() && self.children.is_empty()
    }

    fn join(&mut self, other: &Self) {
        self.tip.join(&other.tip);
        for (label, child) in &other.children {
            match self.children.get_mut(label) {
                Some(existing) => existing.join(child),
                None => {
                    self.children.insert(label.clone(), child.clone());
                }
            }
        }
        self.normalize();
    }

    fn widen(&mut self, other: &Self) {
        self.join(other);
    }

    fn less_or_equal(&self, other: &Self) -> bool {
        self.less_or_equal_with(other, &T::bottom())
    }
}

impl<T: AbstractDomain> PathTree<T> {
    /// Structural order test accumulating the other side's ancestor tips:
    /// taint stored higher in `other` covers anything below it in `self`.
    fn less_or_equal_with(&self, other: &Self, ancestors: &T) -> bool {
        let mut bound = other.tip.clone();
        bound.join(ancestors);
        if !self.tip.less_or_equal(&bound) {
            return false;
        }
        let bottom = Self::bottom();
        for (label, child) in &self.children {
            let counterpart = other.children.get(label).or_else(|| {
                if *label == PathLabel::AnyIndex {
                    None
                } else {
                    other.children.get(&PathLabel::AnyIndex)
                }
            });
            if !child.less_or_equal_with(counterpart.unwrap_or(&bottom), &bound) {
                return false;
            }
        }
        true
    }
}
