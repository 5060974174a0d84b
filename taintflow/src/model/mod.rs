//! Callable models: compact abstract summaries of source / sink /
//! taint-in-taint-out behavior.

/// Inference of constructor models for record-like classes.
pub mod inference;
/// The model-language parser.
pub mod parser;
/// Semantic verification of parsed models against real signatures.
pub mod verify;

use std::collections::{BTreeMap, BTreeSet};

use crate::access_path::{AccessPath, Formal, PathLabel, Root};
use crate::domains::{AbstractDomain, PathTree};
use crate::taint::{
    ComplexFeature, FlowDetails, SimpleFeature, SinkKind, SourceKind, Taint, TaintEnvironment,
};

pub use parser::ModelParser;

/// Sanitize axes: which halves of a model are forcibly cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeAxes {
    /// Clear the forward source summary.
    pub sources: bool,
    /// Clear the backward sink summary.
    pub sinks: bool,
    /// Clear taint-in-taint-out.
    pub tito: bool,
}

impl SanitizeAxes {
    /// All axes at once (a bare `Sanitize` annotation).
    #[must_use]
    pub fn all() -> Self {
        Self {
            sources: true,
            sinks: true,
            tito: true,
        }
    }

    /// Whether any axis is set.
    #[must_use]
    pub fn is_any(&self) -> bool {
        self.sources || self.sinks || self.tito
    }

    /// Axis-wise union.
    pub fn merge(&mut self, other: SanitizeAxes) {
        self.sources |= other.sources;
        self.sinks |= other.sinks;
        self.tito |= other.tito;
    }
}

/// Analysis mode of a callable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Analyzed normally.
    #[default]
    Normal,
    /// Analyzed, then the given axes of the result are cleared.
    Sanitize(SanitizeAxes),
    /// Never analyzed; only the user-declared summary applies.
    SkipAnalysis,
}

impl Mode {
    /// Mode join: skip dominates, sanitize axes union.
    pub fn merge(&mut self, other: Mode) {
        *self = match (*self, other) {
            (Mode::SkipAnalysis, _) | (_, Mode::SkipAnalysis) => Mode::SkipAnalysis,
            (Mode::Sanitize(mut axes), Mode::Sanitize(other_axes)) => {
                axes.merge(other_axes);
                Mode::Sanitize(axes)
            }
            (Mode::Sanitize(axes), Mode::Normal) | (Mode::Normal, Mode::Sanitize(axes)) => {
                Mode::Sanitize(axes)
            }
            (Mode::Normal, Mode::Normal) => Mode::Normal,
        };
    }
}

/// The forward half of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ForwardModel {
    /// Sources reaching each root. `LocalResult` entries summarize the
    /// return value; parameter entries are user-declared parameter
    /// sources seeding the callable's own analysis.
    pub source_taint: TaintEnvironment<SourceKind>,
}

/// The backward half of a model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackwardModel {
    /// Sinks reached from each parameter subfield.
    pub sink_taint: TaintEnvironment<SinkKind>,
    /// Taint-in-taint-out encoded with `LocalReturn` / `ParameterUpdate`.
    pub taint_in_taint_out: TaintEnvironment<SinkKind>,
}

/// A per-callable model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    /// Forward summary.
    pub forward: ForwardModel,
    /// Backward summary.
    pub backward: BackwardModel,
    /// Features attached to arguments without introducing taint.
    pub attach_features: BTreeMap<Root, Vec<SimpleFeature>>,
    /// Per-port sanitizers (supplementing the whole-callable mode).
    pub port_sanitizers: BTreeMap<Root, SanitizeAxes>,
    /// Partial sinks triggered by one half of a combined rule, waiting
    /// for the other half. Survives across fixpoint iterations.
    pub triggered: BTreeMap<Root, BTreeSet<SinkKind>>,
    /// Whole-callable mode.
    pub mode: Mode,
    /// No source was available; conservative defaults apply.
    pub is_obscure: bool,
}

impl Model {
    /// The empty model.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether every summary half is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.source_taint.is_empty()
            && self.backward.sink_taint.is_empty()
            && self.backward.taint_in_taint_out.is_empty()
            && self.attach_features.is_empty()
            && self.triggered.is_empty()
    }

    /// The conservative default for a callable with no body and no model:
    /// every parameter propagates, collapsed, into the return value. With
    /// `find_missing_flows` enabled each parameter additionally reaches
    /// an `Obscure` sink so missing models become visible.
    #[must_use]
    pub fn obscure(parameters: &[Formal], find_missing_flows: bool) -> Self {
        let mut model = Model {
            is_obscure: true,
            ..Model::default()
        };
        for formal in parameters {
            if formal.name.as_str() == "self" {
                continue;
            }
            let mut flow = FlowDetails::declaration();
            flow.add_feature(SimpleFeature::Obscure);
            flow.add_complex(ComplexFeature::ReturnAccessPath(AccessPath::new()));
            let tito = Taint::singleton_with(SinkKind::LocalReturn, flow);
            model
                .backward
                .taint_in_taint_out
                .join_at(&formal.root, &[], &PathTree::leaf(tito));

            if find_missing_flows {
                let mut sink_flow = FlowDetails::declaration();
                sink_flow.add_feature(SimpleFeature::Obscure);
                let sink = Taint::singleton_with(SinkKind::named("Obscure"), sink_flow);
                model
                    .backward
                    .sink_taint
                    .join_at(&formal.root, &[], &PathTree::leaf(sink));
            }
        }
        model
    }

    /// Joins another model into this one, respecting modes.
    pub fn join(&mut self, other: &Self) {
        self.forward.source_taint.join(&other.forward.source_taint);
        self.backward.sink_taint.join(&other.backward.sink_taint);
        self.backward
            .taint_in_taint_out
            .join(&other.backward.taint_in_taint_out);
        for (root, features) in &other.attach_features {
            let slot = self.attach_features.entry(root.clone()).or_default();
            for feature in features {
                if !slot.contains(feature) {
                    slot.push(feature.clone());
                }
            }
        }
        for (root, axes) in &other.port_sanitizers {
            self.port_sanitizers
                .entry(root.clone())
                .or_default()
                .merge(*axes);
        }
        for (root, sinks) in &other.triggered {
            self.triggered
                .entry(root.clone())
                .or_default()
                .extend(sinks.iter().cloned());
        }
        self.mode.merge(other.mode);
        self.is_obscure |= other.is_obscure;
        self.apply_sanitizers();
    }

    /// Widens against another model: join, then bound every environment.
    pub fn widen(&mut self, other: &Self, max_depth: usize, max_trace_length: u32) {
        let mut sources = self.forward.source_taint.clone();
        sources.widen_with(&other.forward.source_taint, max_depth, max_trace_length);
        let mut sinks = self.backward.sink_taint.clone();
        sinks.widen_with(&other.backward.sink_taint, max_depth, max_trace_length);
        let mut tito = self.backward.taint_in_taint_out.clone();
        tito.widen_with(
            &other.backward.taint_in_taint_out,
            max_depth,
            max_trace_length,
        );

        let mut joined = other.clone();
        joined.join(self);
        *self = joined;
        self.forward.source_taint = sources;
        self.backward.sink_taint = sinks;
        self.backward.taint_in_taint_out = tito;
        self.apply_sanitizers();
    }

    /// Order test over the summary halves.
    #[must_use]
    pub fn less_or_equal(&self, other: &Self) -> bool {
        self.forward
            .source_taint
            .less_or_equal(&other.forward.source_taint)
            && self
                .backward
                .sink_taint
                .less_or_equal(&other.backward.sink_taint)
            && self
                .backward
                .taint_in_taint_out
                .less_or_equal(&other.backward.taint_in_taint_out)
            && self
                .triggered
                .iter()
                .all(|(root, sinks)| {
                    other
                        .triggered
                        .get(root)
                        .is_some_and(|other_sinks| sinks.is_subset(other_sinks))
                })
    }

    /// Clears the axes selected by the callable mode and the per-port
    /// sanitizers. Invoked after every join and analysis commit.
    pub fn apply_sanitizers(&mut self) {
        if let Mode::Sanitize(axes) = self.mode {
            if axes.sources {
                self.forward.source_taint = TaintEnvironment::new();
            }
            if axes.sinks {
                self.backward.sink_taint = TaintEnvironment::new();
            }
            if axes.tito {
                self.backward.taint_in_taint_out = TaintEnvironment::new();
            }
        }
        let ports = self.port_sanitizers.clone();
        for (root, axes) in ports {
            if axes.sources {
                self.forward.source_taint.remove(&root);
            }
            if axes.sinks {
                self.backward.sink_taint.remove(&root);
            }
            if axes.tito {
                self.backward.taint_in_taint_out.remove(&root);
            }
        }
    }

    /// The user-declared sources on parameters, used to seed the forward
    /// analysis of the callable itself.
    #[must_use]
    pub fn parameter_sources(&self) -> Vec<(Root, PathTree<Taint<SourceKind>>)> {
        self.forward
            .source_taint
            .iter()
            .filter(|(root, _)| root.is_parameter())
            .map(|(root, tree)| (root.clone(), tree.clone()))
            .collect()
    }

    /// Declares a source at a port, as the model parser builds models.
    pub fn add_source(&mut self, root: Root, path: &[PathLabel], kind: SourceKind, flow: FlowDetails) {
        let taint = Taint::singleton_with(kind, flow);
        self.forward
            .source_taint
            .join_at(&root, path, &PathTree::leaf(taint));
    }

    /// Declares a sink at a port.
    pub fn add_sink(&mut self, root: Root, path: &[PathLabel], kind: SinkKind, flow: FlowDetails) {
        let taint = Taint::singleton_with(kind, flow);
        self.backward
            .sink_taint
            .join_at(&root, path, &PathTree::leaf(taint));
    }

    /// Declares taint-in-taint-out from a parameter to the return value
    /// (or to another parameter for `ParameterUpdate`).
    pub fn add_tito(
        &mut self,
        root: Root,
        path: &[PathLabel],
        kind: SinkKind,
        return_path: AccessPath,
        mut flow: FlowDetails,
    ) {
        flow.add_complex(ComplexFeature::ReturnAccessPath(return_path));
        let taint = Taint::singleton_with(kind, flow);
        self.backward
            .taint_in_taint_out
            .join_at(&root, path, &PathTree::leaf(taint));
    }
}
