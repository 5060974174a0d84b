//! Issue detection.
//!
//! Pairs the forward taint of call-site arguments against callee sink
//! summaries under the configured rules. Each rule partitions both sides
//! independently by its allowed kinds; kinds outside every rule are never
//! reported. Issues deduplicate by code, location and callee.

use std::collections::BTreeMap;

use crate::access_path::Root;
use crate::config::Rule;
use crate::domains::AbstractDomain;
use crate::taint::{
    BackwardTaint, BackwardTaintTree, FeatureSet, ForwardTaint, ForwardTaintTree, SimpleFeature,
    TaintKind,
};
use crate::target::Target;
use crate::utils::Location;

use super::AnalysisContext;

/// Identifies the sink end of a flow for stable reporting.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SinkHandle {
    /// The sink kind name.
    pub kind: String,
    /// Canonical callee the sink summary came from.
    pub callee: String,
    /// Positional index of the sinking parameter (0 when named-only).
    pub index: u32,
    /// Name of the sinking parameter.
    pub parameter: String,
}

impl SinkHandle {
    fn new(kind: String, callee: &Target, port: &Root) -> Self {
        let (index, parameter) = match port {
            Root::PositionalParameter { position, name } => (*position, name.to_string()),
            Root::NamedParameter(name) => (0, name.to_string()),
            Root::StarParameter => (0, "*args".to_owned()),
            Root::StarStarParameter => (0, "**kwargs".to_owned()),
            other => (0, other.to_string()),
        };
        Self {
            kind,
            callee: callee.canonical(),
            index,
            parameter,
        }
    }
}

/// A candidate flow recorded at one call-site argument.
#[derive(Debug)]
pub struct IssueCandidate {
    /// Location of the call.
    pub location: Location,
    /// The callee whose model supplied the sinks.
    pub callee: Target,
    /// The formal port the sink sat on.
    pub port: Root,
    /// Forward taint of the argument.
    pub forward: ForwardTaintTree,
    /// The callee's sink taint at that port, call-applied.
    pub backward: BackwardTaintTree,
    /// Set when a combined-source pairing already fixed the rule.
    pub combined_code: Option<u32>,
}

/// A reported source-to-sink flow.
#[derive(Debug, Clone)]
pub struct Issue {
    /// Rule code.
    pub code: u32,
    /// Rendered message.
    pub message: String,
    /// The callable the flow was found in.
    pub callable: Target,
    /// 1-indexed definition line of that callable.
    pub callable_line: u32,
    /// Call-site location.
    pub location: Location,
    /// File of the enclosing module.
    pub filename: String,
    /// The matched source taint.
    pub source_taint: ForwardTaint,
    /// The matched sink taint.
    pub sink_taint: BackwardTaint,
    /// Features joined over both sides.
    pub features: FeatureSet,
    /// Sink identification.
    pub sink_handle: SinkHandle,
}

impl Issue {
    /// The deduplication key: code, location, canonical callee set.
    #[must_use]
    pub fn dedup_key(&self) -> (u32, Location, String) {
        (self.code, self.location, self.sink_handle.callee.clone())
    }
}

/// Generates issues from the candidates of one callable.
#[must_use]
pub fn generate(context: &AnalysisContext<'_>, candidates: Vec<IssueCandidate>) -> Vec<Issue> {
    let mut deduped: BTreeMap<(u32, Location, String), Issue> = BTreeMap::new();

    for candidate in candidates {
        for issue in issues_of_candidate(context, &candidate) {
            match deduped.entry(issue.dedup_key()) {
                std::collections::btree_map::Entry::Occupied(mut entry) => {
                    let existing = entry.get_mut();
                    existing.source_taint.join(&issue.source_taint);
                    existing.sink_taint.join(&issue.sink_taint);
                    existing.features.join(&issue.features);
                }
                std::collections::btree_map::Entry::Vacant(entry) => {
                    entry.insert(issue);
                }
            }
        }
    }

    deduped.into_values().collect()
}

fn issues_of_candidate(context: &AnalysisContext<'_>, candidate: &IssueCandidate) -> Vec<Issue> {
    if let Some(code) = candidate.combined_code {
        let Some(rule) = context.config.rules.iter().find(|rule| rule.code == code) else {
            return Vec::new();
        };
        let source_taint = candidate.forward.collapse();
        let sink_taint = candidate.backward.collapse();
        if source_taint.is_bottom() || sink_taint.is_bottom() {
            return Vec::new();
        }
        return vec![build_issue(context, candidate, rule, source_taint, sink_taint)];
    }

    let mut issues = Vec::new();
    for rule in &context.config.rules {
        if rule.combined.is_some() {
            continue;
        }
        let mut matched_sources = ForwardTaint::bottom();
        let mut matched_sinks = BackwardTaint::bottom();

        // Walk the sink tree's ports; at each non-empty tip, read the
        // forward taint applicable at the same path.
        candidate.backward.fold_tips(&mut |path, sink_tip| {
            let mut sinks = sink_tip.clone();
            sinks.retain_kinds(|kind| {
                !kind.ignore_leaf_at_call() && rule.sinks.contains(kind)
            });
            if sinks.is_bottom() {
                return;
            }
            let mut sources = candidate.forward.read(path);
            sources.retain_kinds(|kind| rule.sources.contains(kind));
            if sources.is_bottom() {
                return;
            }
            matched_sources.join(&sources);
            matched_sinks.join(&sinks);
        });

        if matched_sources.is_bottom() || matched_sinks.is_bottom() {
            continue;
        }
        if !transforms_satisfied(rule, &matched_sources, &matched_sinks) {
            continue;
        }
        issues.push(build_issue(
            context,
            candidate,
            rule,
            matched_sources,
            matched_sinks,
        ));
    }
    issues
}

/// Every transform named by the rule must appear as a transform feature
/// on the flow.
fn transforms_satisfied(rule: &Rule, sources: &ForwardTaint, sinks: &BackwardTaint) -> bool {
    rule.transforms.iter().all(|transform| {
        let feature = SimpleFeature::Transform(transform.clone());
        sources
            .iter()
            .any(|(_, flow)| flow.features.contains(&feature))
            || sinks
                .iter()
                .any(|(_, flow)| flow.features.contains(&feature))
    })
}

fn build_issue(
    context: &AnalysisContext<'_>,
    candidate: &IssueCandidate,
    rule: &Rule,
    source_taint: ForwardTaint,
    sink_taint: BackwardTaint,
) -> Issue {
    let mut features = FeatureSet::new();
    for (_, flow) in source_taint.iter() {
        features.join(&flow.features);
    }
    for (_, flow) in sink_taint.iter() {
        features.join(&flow.features);
    }

    let sink_kind = sink_taint
        .kinds()
        .next()
        .map(ToString::to_string)
        .unwrap_or_default();

    Issue {
        code: rule.code,
        message: render_message(rule, &source_taint, &sink_taint),
        callable: context.target.clone(),
        callable_line: context.define_line,
        location: candidate.location,
        filename: context.module.path.display().to_string(),
        source_taint,
        sink_taint,
        features,
        sink_handle: SinkHandle::new(sink_kind, &candidate.callee, &candidate.port),
    }
}

/// Substitutes `{$sources}` and `{$sinks}` in the rule's message format.
fn render_message(rule: &Rule, sources: &ForwardTaint, sinks: &BackwardTaint) -> String {
    let source_names: Vec<String> = sources.kinds().map(ToString::to_string).collect();
    let sink_names: Vec<String> = sinks.kinds().map(ToString::to_string).collect();
    rule.message_format
        .replace("{$sources}", &source_names.join(", "))
        .replace("{$sinks}", &sink_names.join(", "))
}
