//! Per-callable dataflow analyses.
//!
//! The forward pass propagates sources, discovers issue candidates at
//! call sites, and summarizes what reaches the return value. The backward
//! pass computes sink reachability and taint-in-taint-out per parameter.
//! Both interpret the define's AST directly, joining at branch merges and
//! widening at loop heads.

/// Backward analysis: sink reachability and taint-in-taint-out.
pub mod backward;
/// Forward analysis: source propagation.
pub mod forward;
/// Issue detection: source-tree × sink-tree intersection under rules.
pub mod issues;

use std::sync::Arc;

use ruff_python_ast::{self as ast, Expr};
use rustc_hash::FxHashMap;

use crate::access_path::{match_actuals_to_formals, AccessPath, Formal, Root};
use crate::config::TaintConfig;
use crate::graph::{CallSites, CallTarget};
use crate::model::Model;
use crate::resolver::ParsedModule;
use crate::store::SharedModelTable;
use crate::taint::SinkKind;
use crate::target::Target;
use crate::utils::LineIndex;

pub use issues::{Issue, IssueCandidate, SinkHandle};

/// Everything a per-callable analysis needs, read-only.
pub struct AnalysisContext<'a> {
    /// The analyzed callable.
    pub target: &'a Target,
    /// The module it lives in.
    pub module: &'a ParsedModule,
    /// Resolved call sites of the define.
    pub call_sites: &'a CallSites,
    /// Model table snapshot source.
    pub store: &'a SharedModelTable,
    /// Taint configuration.
    pub config: &'a TaintConfig,
    /// The callable's current model (declared parameter sources, modes).
    pub model: &'a Model,
    /// The callable's own formals.
    pub formals: &'a [Formal],
    /// 1-indexed line the callable is defined on.
    pub define_line: u32,
    /// Whether obscure callees report a synthetic sink.
    pub find_missing_flows: bool,
}

impl<'a> AnalysisContext<'a> {
    /// The line index of the enclosing module.
    #[must_use]
    pub fn line_index(&self) -> &LineIndex {
        &self.module.line_index
    }

    /// The model of a callee: the stored snapshot, or the obscure default
    /// for targets with no model (pruned or external). Stored obscure
    /// placeholders (collapsed override sets) also expand against the
    /// call site's formals.
    #[must_use]
    pub fn callee_model(&self, call_target: &CallTarget) -> Arc<Model> {
        match self.store.get(&call_target.target) {
            Some(model) if model.is_obscure && model.is_empty() => Arc::new(Model::obscure(
                &call_target.formals,
                self.find_missing_flows,
            )),
            Some(model) => model,
            None => Arc::new(Model::obscure(
                &call_target.formals,
                self.find_missing_flows,
            )),
        }
    }

    /// Bounds from configuration.
    #[must_use]
    pub fn max_tree_depth(&self) -> usize {
        self.config.constraints.maximum_tree_depth
    }

    /// Trace-length cap from configuration.
    #[must_use]
    pub fn max_trace_length(&self) -> u32 {
        self.config.constraints.maximum_trace_length
    }

    /// Matches the actuals of a call against a callee, handling the
    /// implicit receiver of bound method and constructor calls.
    #[must_use]
    pub fn bindings<'e>(
        &self,
        call: &'e ast::ExprCall,
        call_target: &CallTarget,
    ) -> Vec<Binding<'e>> {
        let mut bindings = Vec::new();
        let formals: &[Formal] = if call_target.implicit_receiver {
            if let Some(receiver) = call_target.formals.first() {
                // Bound method call: the receiver expression feeds the
                // first formal. Constructor calls have no receiver
                // expression; the fresh object does.
                if let Expr::Attribute(attr) = &*call.func {
                    bindings.push(Binding {
                        value: Some(&attr.value),
                        root: receiver.root.clone(),
                        actual_path: AccessPath::new(),
                    });
                }
            }
            call_target.formals.get(1..).unwrap_or(&[])
        } else {
            &call_target.formals
        };

        for matched in match_actuals_to_formals(&call.arguments, formals) {
            for argument_match in matched.matches {
                bindings.push(Binding {
                    value: Some(matched.value),
                    root: argument_match.root,
                    actual_path: argument_match.actual_path,
                });
            }
        }
        bindings
    }

    /// The actual expression bound to a positional parameter of the
    /// callee, for `ParameterUpdate` routing.
    #[must_use]
    pub fn actual_at_position<'e>(
        &self,
        call: &'e ast::ExprCall,
        call_target: &CallTarget,
        position: u32,
    ) -> Option<&'e Expr> {
        let offset = usize::from(call_target.implicit_receiver);
        let index = (position as usize).checked_sub(offset)?;
        call.arguments.args.get(index).map(|expr| match expr {
            Expr::Starred(starred) => &*starred.value,
            other => other,
        })
    }
}

/// One argument-to-formal binding at a call site.
#[derive(Debug)]
pub struct Binding<'e> {
    /// The bound expression. `None` only for the receiver of a
    /// constructor call, whose value is the fresh object.
    pub value: Option<&'e Expr>,
    /// The callee formal fed by this binding.
    pub root: Root,
    /// Path to read on the actual to obtain the bound value.
    pub actual_path: AccessPath,
}

/// Triggered partial sinks discovered by the forward pass, keyed by call
/// offset, handed to the backward pass for propagation. Distinct from the
/// per-callable triggered map stored in the model.
pub type TriggeredSinks = FxHashMap<u32, Vec<(Root, SinkKind)>>;

/// The result of one per-callable analysis round.
#[derive(Debug)]
pub struct DefineAnalysisResult {
    /// The freshly computed model (not yet joined with the stored one).
    pub model: Model,
    /// Issues found at this callable's call sites.
    pub issues: Vec<Issue>,
}

/// Runs forward then backward analysis over one define.
#[must_use]
pub fn analyze_define(
    context: &AnalysisContext<'_>,
    define: &ast::StmtFunctionDef,
) -> DefineAnalysisResult {
    if context.model.mode == crate::model::Mode::SkipAnalysis {
        return DefineAnalysisResult {
            model: context.model.clone(),
            issues: Vec::new(),
        };
    }

    let forward_result = forward::analyze(context, define);
    let backward_result = backward::analyze(context, define, &forward_result.triggered);

    let mut model = Model {
        forward: crate::model::ForwardModel {
            source_taint: forward_result.source_taint,
        },
        backward: crate::model::BackwardModel {
            sink_taint: backward_result.sink_taint,
            taint_in_taint_out: backward_result.taint_in_taint_out,
        },
        attach_features: context.model.attach_features.clone(),
        port_sanitizers: context.model.port_sanitizers.clone(),
        triggered: backward_result.triggered,
        mode: context.model.mode,
        is_obscure: false,
    };
    model.apply_sanitizers();

    let issues = issues::generate(context, forward_result.candidates);
    DefineAnalysisResult { model, issues }
}
