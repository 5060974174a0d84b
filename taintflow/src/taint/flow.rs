//! Flow details: the product attached to each taint leaf.

use std::collections::BTreeSet;

use crate::domains::AbstractDomain;

use super::features::{ComplexFeature, FeatureSet, SimpleFeature};
use super::trace::TraceInfo;

/// Provenance and metadata for one kind of taint at one tree tip: a
/// product of {trace-info set, simple-feature over-under set,
/// complex-feature set}.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowDetails {
    /// Where the taint came from.
    pub trace: BTreeSet<TraceInfo>,
    /// Simple features with may/always precision.
    pub features: FeatureSet,
    /// Structured features.
    pub complex: BTreeSet<ComplexFeature>,
}

impl FlowDetails {
    /// Flow details for taint asserted in a model.
    #[must_use]
    pub fn declaration() -> Self {
        Self {
            trace: BTreeSet::from([TraceInfo::Declaration]),
            features: FeatureSet::new(),
            complex: BTreeSet::new(),
        }
    }

    /// Flow details originating at a concrete location.
    #[must_use]
    pub fn origin(location: crate::utils::Location) -> Self {
        Self {
            trace: BTreeSet::from([TraceInfo::Origin(location)]),
            features: FeatureSet::new(),
            complex: BTreeSet::new(),
        }
    }

    /// Whether any trace is still an unreified declaration.
    #[must_use]
    pub fn has_declaration(&self) -> bool {
        self.trace.contains(&TraceInfo::Declaration)
    }

    /// The shortest hop count among the traces, used for reporting.
    #[must_use]
    pub fn min_trace_length(&self) -> u32 {
        self.trace.iter().map(TraceInfo::length).min().unwrap_or(0)
    }

    /// Adds an always-present simple feature.
    pub fn add_feature(&mut self, feature: SimpleFeature) {
        self.features.add_always(feature);
    }

    /// Adds a complex feature.
    pub fn add_complex(&mut self, feature: ComplexFeature) {
        self.complex.insert(feature);
    }

    /// The return-path complex features, in order.
    pub fn return_paths(&self) -> impl Iterator<Item = &crate::access_path::AccessPath> {
        self.complex.iter().map(|feature| match feature {
            ComplexFeature::ReturnAccessPath(path) => path,
        })
    }

    /// Caps every call-site trace at `cap` hops.
    pub fn cap_trace_length(&mut self, cap: u32) {
        if self.trace.iter().all(|trace| trace.length() <= cap) {
            return;
        }
        self.trace = self
            .trace
            .iter()
            .map(|trace| match trace {
                TraceInfo::CallSite {
                    port,
                    path,
                    location,
                    callees,
                    length,
                } => TraceInfo::CallSite {
                    port: port.clone(),
                    path: path.clone(),
                    location: *location,
                    callees: callees.clone(),
                    length: (*length).min(cap),
                },
                other => other.clone(),
            })
            .collect();
    }
}

impl AbstractDomain for FlowDetails {
    fn bottom() -> Self {
        Self::default()
    }

    fn is_bottom(&self) -> bool {
        // Features without a trace cannot exist; the trace set is the
        // carrier.
        self.trace.is_empty()
    }

    fn join(&mut self, other: &Self) {
        self.trace.extend(other.trace.iter().cloned());
        self.features.join(&other.features);
        self.complex.extend(other.complex.iter().cloned());
    }

    fn less_or_equal(&self, other: &Self) -> bool {
        self.trace.is_subset(&other.trace)
            && self.features.less_or_equal(&other.features)
            && self.complex.is_subset(&other.complex)
    }
}
