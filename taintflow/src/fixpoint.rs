//! The interprocedural fixpoint.
//!
//! Iterates over epochs: dirty callables are re-analyzed in parallel
//! chunks, their fresh models join into the stored ones, and strict
//! growth dirties reverse dependents. A callable re-analyzed past the
//! widening threshold within an epoch has its model widened to force
//! convergence. Override targets have no body; their models are reduced
//! from their members after every epoch.

use indicatif::{ProgressBar, ProgressStyle};
use ruff_python_ast as ast;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::analysis::{analyze_define, AnalysisContext, Issue};
use crate::config::TaintConfig;
use crate::errors::AnalysisError;
use crate::graph::{CallSites, DependencyGraph, OverrideGraph};
use crate::model::Model;
use crate::resolver::ParsedModule;
use crate::scheduler::{Scheduler, SchedulingPolicy};
use crate::store::SharedModelTable;
use crate::target::Target;

/// Epochs are bounded: exceeding this means `less_or_equal` is broken,
/// not that the input is large.
const MAX_EPOCHS: usize = 100;

/// One analyzable define, prepared by the driver.
pub struct DefineEntry<'a> {
    /// The callable.
    pub target: Target,
    /// Its body.
    pub define: &'a ast::StmtFunctionDef,
    /// The module it lives in.
    pub module: &'a ParsedModule,
    /// Resolved call sites of the body.
    pub call_sites: CallSites,
    /// Formal parameters.
    pub formals: Vec<crate::access_path::Formal>,
    /// 1-indexed definition line.
    pub line: u32,
}

/// The outcome of a converged fixpoint.
#[derive(Debug)]
pub struct FixpointResult {
    /// All issues, deterministically ordered.
    pub issues: Vec<Issue>,
    /// Epochs needed to converge.
    pub epochs: usize,
}

/// Tunables threaded from the driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixpointOptions {
    /// Whether obscure callees report a synthetic sink.
    pub find_missing_flows: bool,
    /// Hide the progress bar (tests, machine output).
    pub quiet: bool,
}

/// Runs the interprocedural fixpoint to convergence.
pub fn run(
    defines: &[DefineEntry<'_>],
    store: &SharedModelTable,
    config: &TaintConfig,
    override_graph: &OverrideGraph,
    scheduler: &Scheduler,
    options: FixpointOptions,
) -> Result<FixpointResult, AnalysisError> {
    let dependency_graph = build_dependency_graph(defines, override_graph);
    let defines_by_target: FxHashMap<&Target, &DefineEntry<'_>> =
        defines.iter().map(|entry| (&entry.target, entry)).collect();

    // A callable is analyzed only when it is reachable from an entry in
    // the call ∪ override graph. Every define is an entry here; stub and
    // override targets stay in only if something calls them.
    let entries: Vec<Target> = defines.iter().map(|entry| entry.target.clone()).collect();
    let reachable = dependency_graph.reachable_from(&entries);

    // Everything reachable with a body starts dirty; bottom-up component
    // order makes the first epoch do most of the work.
    let mut dirty: FxHashSet<Target> = defines
        .iter()
        .filter(|entry| reachable.contains(&entry.target))
        .map(|entry| entry.target.clone())
        .collect();
    let mut analysis_counts: FxHashMap<Target, u32> = FxHashMap::default();
    let mut issues_by_callable: BTreeMap<Target, Vec<Issue>> = BTreeMap::new();

    let policy = SchedulingPolicy::FixedChunkCount {
        count: 0,
        min_chunk_size: 1,
        preferred_chunks_per_worker: 4,
    };

    let progress = if options.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(defines.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} epoch {msg}: {pos}/{len} callables")
        {
            bar.set_style(style);
        }
        bar
    };

    let mut epoch = 0;
    while !dirty.is_empty() {
        epoch += 1;
        if epoch > MAX_EPOCHS {
            return Err(AnalysisError::NonConvergence { epochs: epoch });
        }

        // Deterministic scheduling order within the epoch.
        let mut scheduled: Vec<Target> = Vec::new();
        for component in dependency_graph.components_bottom_up() {
            for target in component {
                if dirty.contains(&target) && defines_by_target.contains_key(&target) {
                    scheduled.push(target);
                }
            }
        }
        dirty.clear();

        progress.set_message(epoch.to_string());
        progress.set_length(scheduled.len() as u64);
        progress.set_position(0);
        tracing::debug!(epoch, callables = scheduled.len(), "fixpoint epoch");

        type Computed = Vec<(Target, Model, Vec<Issue>)>;
        let computed: Computed = scheduler.map_reduce(
            &policy,
            Vec::new(),
            &scheduled,
            |mut accumulator: Computed, chunk: &[Target]| {
                for target in chunk {
                    let Some(entry) = defines_by_target.get(target) else {
                        continue;
                    };
                    let existing = store.get(target).unwrap_or_default();
                    let context = AnalysisContext {
                        target,
                        module: entry.module,
                        call_sites: &entry.call_sites,
                        store,
                        config,
                        model: &existing,
                        formals: &entry.formals,
                        define_line: entry.line,
                        find_missing_flows: options.find_missing_flows,
                    };
                    let result = analyze_define(&context, entry.define);
                    accumulator.push((target.clone(), result.model, result.issues));
                    progress.inc(1);
                }
                accumulator
            },
            |mut left, mut right| {
                left.append(&mut right);
                left
            },
        )?;

        // Commit step: the single writer to the shared table.
        let mut commits = computed;
        commits.sort_by(|a, b| a.0.cmp(&b.0));
        for (target, new_model, issues) in commits {
            issues_by_callable.insert(target.clone(), issues);

            let old = store.get(&target);
            let count = analysis_counts.entry(target.clone()).or_insert(0);
            *count += 1;

            let mut next = old.as_deref().cloned().unwrap_or_default();
            if *count > config.constraints.widening_threshold {
                next.widen(
                    &new_model,
                    config.constraints.maximum_tree_depth,
                    config.constraints.maximum_trace_length,
                );
            } else {
                next.join(&new_model);
            }

            // First commits store even empty models: a callable with a
            // body and nothing to say must not read back as obscure.
            let grew = match &old {
                Some(old) => !next.less_or_equal(old),
                None => true,
            };
            if grew {
                store.put(target.clone(), next)?;
                for caller in dependency_graph.callers_of(&target) {
                    if defines_by_target.contains_key(&caller) || caller.is_override() {
                        dirty.insert(caller);
                    }
                }
            }
        }

        // Override targets: an ad-hoc reduce, not a body analysis.
        reduce_override_models(store, override_graph, &dependency_graph, &mut dirty)?;
    }

    progress.finish_and_clear();

    let mut issues: Vec<Issue> = issues_by_callable.into_values().flatten().collect();
    issues.sort_by(|a, b| {
        (a.location, a.code, &a.sink_handle).cmp(&(b.location, b.code, &b.sink_handle))
    });
    Ok(FixpointResult { issues, epochs: epoch })
}

/// Builds the call ∪ override dependency graph.
fn build_dependency_graph(
    defines: &[DefineEntry<'_>],
    override_graph: &OverrideGraph,
) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for entry in defines {
        graph.add_target(&entry.target);
        for callee in entry.call_sites.all_targets() {
            graph.add_dependency(&entry.target, &callee);
        }
    }
    for override_target in override_graph.targets() {
        for member in override_graph.members(override_target) {
            graph.add_dependency(override_target, member);
        }
    }
    graph
}

/// Recomputes each override target's model as the join of its members,
/// dirtying dependents on growth. Collapsed override sets stay obscure.
fn reduce_override_models(
    store: &SharedModelTable,
    override_graph: &OverrideGraph,
    dependency_graph: &DependencyGraph,
    dirty: &mut FxHashSet<Target>,
) -> Result<(), AnalysisError> {
    for override_target in override_graph.targets() {
        let mut joined = Model::empty();
        if override_graph.is_collapsed(override_target) {
            joined = Model::obscure(&[], false);
        } else {
            for member in override_graph.members(override_target) {
                if let Some(model) = store.get(member) {
                    joined.join(&model);
                }
            }
        }
        let old = store.get(override_target);
        let grew = match &old {
            Some(old) => !joined.less_or_equal(old),
            None => true,
        };
        if grew {
            store.put(override_target.clone(), joined)?;
            dirty.remove(override_target);
            for caller in dependency_graph.callers_of(override_target) {
                if !caller.is_override() {
                    dirty.insert(caller);
                }
            }
        }
    }
    Ok(())
}
