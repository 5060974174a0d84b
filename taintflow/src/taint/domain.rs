//! Kind-indexed taint maps.

use std::collections::{BTreeMap, BTreeSet};

use crate::access_path::{AccessPath, Root};
use crate::domains::AbstractDomain;
use crate::target::Target;
use crate::utils::Location;

use super::features::SimpleFeature;
use super::flow::FlowDetails;
use super::kinds::TaintKind;
use super::trace::TraceInfo;

/// A finite map from kind to flow details. Absent kinds map to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taint<K: TaintKind> {
    map: BTreeMap<K, FlowDetails>,
}

impl<K: TaintKind> Default for Taint<K> {
    fn default() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }
}

/// Named projections into the taint product, for the generic traversal
/// entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaintPart {
    /// The per-kind trace-info sets.
    TraceInfo,
    /// The over-under simple-feature sets.
    SimpleFeature,
    /// The complex-feature sets.
    ComplexFeature,
}

/// A borrowed projection produced while folding over a [`TaintPart`].
#[derive(Debug, Clone, Copy)]
pub enum PartRef<'a> {
    /// One trace-info element.
    TraceInfo(&'a TraceInfo),
    /// One simple feature with its always bit.
    SimpleFeature(&'a SimpleFeature, bool),
    /// One complex feature.
    ComplexFeature(&'a super::features::ComplexFeature),
}

impl<K: TaintKind> Taint<K> {
    /// Taint of a single kind, flagged as a model declaration.
    #[must_use]
    pub fn singleton(kind: K) -> Self {
        Self::singleton_with(kind, FlowDetails::declaration())
    }

    /// Taint of a single kind with explicit flow details.
    #[must_use]
    pub fn singleton_with(kind: K, flow: FlowDetails) -> Self {
        let mut map = BTreeMap::new();
        if !flow.is_bottom() {
            map.insert(kind, flow);
        }
        Self { map }
    }

    /// Whether the given kind is present.
    #[must_use]
    pub fn contains(&self, kind: &K) -> bool {
        self.map.contains_key(kind)
    }

    /// Flow details for a kind, if present.
    #[must_use]
    pub fn get(&self, kind: &K) -> Option<&FlowDetails> {
        self.map.get(kind)
    }

    /// Iterates `(kind, flow)` pairs in kind order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &FlowDetails)> {
        self.map.iter()
    }

    /// The kinds present, in order.
    pub fn kinds(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// Number of kinds present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no kind is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Joins flow details into one kind.
    pub fn add(&mut self, kind: K, flow: FlowDetails) {
        if flow.is_bottom() {
            return;
        }
        match self.map.get_mut(&kind) {
            Some(existing) => existing.join(&flow),
            None => {
                self.map.insert(kind, flow);
            }
        }
    }

    /// Keeps only kinds accepted by the predicate.
    pub fn retain_kinds(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.map.retain(|kind, _| keep(kind));
    }

    /// Splits by kind: each kind's flow lands in the partition chosen by
    /// `project`; kinds projected to `None` are dropped.
    #[must_use]
    pub fn partition<Key: Ord>(&self, project: impl Fn(&K) -> Option<Key>) -> BTreeMap<Key, Self> {
        let mut partitions: BTreeMap<Key, Self> = BTreeMap::new();
        for (kind, flow) in &self.map {
            if let Some(key) = project(kind) {
                partitions
                    .entry(key)
                    .or_default()
                    .add(kind.clone(), flow.clone());
            }
        }
        partitions
    }

    /// Folds over one named part of the product across all kinds.
    pub fn fold_part<A>(
        &self,
        part: TaintPart,
        init: A,
        mut fold: impl FnMut(A, &K, PartRef<'_>) -> A,
    ) -> A {
        let mut acc = init;
        for (kind, flow) in &self.map {
            match part {
                TaintPart::TraceInfo => {
                    for trace in &flow.trace {
                        acc = fold(acc, kind, PartRef::TraceInfo(trace));
                    }
                }
                TaintPart::SimpleFeature => {
                    for (feature, always) in flow.features.iter() {
                        acc = fold(acc, kind, PartRef::SimpleFeature(feature, always));
                    }
                }
                TaintPart::ComplexFeature => {
                    for feature in &flow.complex {
                        acc = fold(acc, kind, PartRef::ComplexFeature(feature));
                    }
                }
            }
        }
        acc
    }

    /// Rewrites every kind's flow details in place, dropping kinds whose
    /// flow becomes bottom.
    pub fn transform_flows(&mut self, transform: impl Fn(&K, &mut FlowDetails)) {
        for (kind, flow) in &mut self.map {
            transform(kind, flow);
        }
        self.map.retain(|_, flow| !flow.is_bottom());
    }

    /// Adds an always feature to every kind's flow.
    pub fn add_feature(&mut self, feature: &SimpleFeature) {
        self.transform_flows(|_, flow| flow.add_feature(feature.clone()));
    }

    /// Transforms trace info across a call site.
    ///
    /// Per-trace: declarations reify into origins at the site, origins
    /// become length-1 call sites, call sites grow one hop (capped at
    /// `max_trace_length`). Transient tito markers are stripped. On first
    /// reification a leaf-name feature is attached per callee, except for
    /// kinds that never appear as issue leaves.
    #[must_use]
    pub fn apply_call(
        &self,
        location: Location,
        callees: &[Target],
        port: &Root,
        path: &AccessPath,
        max_trace_length: u32,
    ) -> Self {
        let mut result = Self::default();
        for (kind, flow) in &self.map {
            let had_declaration = flow.has_declaration();
            let mut new_flow = FlowDetails {
                trace: BTreeSet::new(),
                features: flow.features.clone(),
                complex: flow.complex.clone(),
            };
            for trace in &flow.trace {
                let advanced = trace.apply_call(location, callees, port, path, max_trace_length);
                merge_trace(&mut new_flow, advanced);
            }
            new_flow
                .features
                .retain(|feature| !matches!(feature, SimpleFeature::TitoPosition(_)));
            if had_declaration && !kind.ignore_leaf_at_call() {
                for callee in callees {
                    new_flow
                        .features
                        .add_always(SimpleFeature::LeafName(callee.canonical().into()));
                }
            }
            result.add(kind.clone(), new_flow);
        }
        result
    }

    /// Strips details irrelevant to callers when a callee's effect is
    /// summarized: transient tito markers go away and call-site traces are
    /// capped.
    #[must_use]
    pub fn essential(&self, max_trace_length: u32) -> Self {
        let mut result = self.clone();
        result.transform_flows(|_, flow| {
            flow.features
                .retain(|feature| !matches!(feature, SimpleFeature::TitoPosition(_)));
            flow.cap_trace_length(max_trace_length);
        });
        result
    }
}

/// Inserts a trace, collapsing call sites that differ only in length to
/// the shortest one.
fn merge_trace(flow: &mut FlowDetails, trace: TraceInfo) {
    if let TraceInfo::CallSite {
        port,
        path,
        location,
        callees,
        length,
    } = &trace
    {
        let existing = flow.trace.iter().find_map(|candidate| match candidate {
            TraceInfo::CallSite {
                port: p,
                path: q,
                location: l,
                callees: c,
                length: n,
            } if p == port && q == path && l == location && c == callees => Some((candidate.clone(), *n)),
            _ => None,
        });
        if let Some((old, old_length)) = existing {
            if old_length <= *length {
                return;
            }
            flow.trace.remove(&old);
        }
    }
    flow.trace.insert(trace);
}

impl<K: TaintKind> AbstractDomain for Taint<K> {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        self.map.is_empty()
    }

    fn join(&mut self, other: &Self) {
        for (kind, flow) in &other.map {
            self.add(kind.clone(), flow.clone());
        }
    }

    fn less_or_equal(&self, other: &Self) -> bool {
        self.map.iter().all(|(kind, flow)| {
            other
                .map
                .get(kind)
                .is_some_and(|other_flow| flow.less_or_equal(other_flow))
        })
    }
}
