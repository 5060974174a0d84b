//! Backward taint analysis.
//!
//! Interprets a define's body in reverse, computing for each root the
//! taint its value would collect if it flowed forward: sinks reached via
//! calls, and the `LocalReturn` / `ParameterUpdate` taint that encodes
//! taint-in-taint-out. The pass finishes by projecting the parameter
//! roots into the callable's backward summary.

use std::collections::{BTreeMap, BTreeSet};

use compact_str::CompactString;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;
use smallvec::smallvec;

use crate::access_path::{AccessPath, PathLabel, Root};
use crate::domains::{AbstractDomain, PathTree};
use crate::taint::{
    apply_call_to_tree, BackwardTaint, BackwardTaintTree, SimpleFeature, SinkKind,
    TaintEnvironment,
};
use crate::utils::Location;

use super::forward::{access_path_of, index_label};
use super::{AnalysisContext, TriggeredSinks};

/// Extends the return paths of propagated taint by a construction label:
/// a value placed inside a literal lands one level deeper in the result.
fn extend_return_paths(tree: &mut BackwardTaintTree, label: &PathLabel) {
    use crate::taint::ComplexFeature;
    tree.transform_tips(&|taint| {
        taint.transform_flows(|kind, flow| {
            if !kind.is_tito() || flow.complex.is_empty() {
                return;
            }
            flow.complex = flow
                .complex
                .iter()
                .map(|feature| match feature {
                    ComplexFeature::ReturnAccessPath(path) => {
                        let mut extended = path.clone();
                        extended.push(label.clone());
                        ComplexFeature::ReturnAccessPath(extended)
                    }
                })
                .collect();
        });
    });
}

/// The outputs of one backward pass.
#[derive(Debug)]
pub struct BackwardResult {
    /// Sinks reached per parameter subfield.
    pub sink_taint: TaintEnvironment<SinkKind>,
    /// Taint-in-taint-out per parameter subfield.
    pub taint_in_taint_out: TaintEnvironment<SinkKind>,
    /// Partial sinks to keep triggered on this callable's parameters.
    pub triggered: BTreeMap<Root, BTreeSet<SinkKind>>,
}

/// Runs the backward analysis over one define.
#[must_use]
pub fn analyze(
    context: &AnalysisContext<'_>,
    define: &ast::StmtFunctionDef,
    triggered_from_forward: &TriggeredSinks,
) -> BackwardResult {
    let mut pass = BackwardPass {
        context,
        env: TaintEnvironment::new(),
        triggered_from_forward,
    };

    // Seed: whatever reaches the return value is taint-in-taint-out. The
    // empty return path grows as the seed descends into constructors.
    let mut seed_flow = crate::taint::FlowDetails::declaration();
    seed_flow.add_complex(crate::taint::ComplexFeature::ReturnAccessPath(smallvec![]));
    pass.env.assign(
        &Root::LocalResult,
        &[],
        PathTree::leaf(BackwardTaint::singleton_with(SinkKind::LocalReturn, seed_flow)),
    );

    for stmt in define.body.iter().rev() {
        pass.exec(stmt);
    }

    pass.into_result()
}

struct BackwardPass<'a, 'c> {
    context: &'a AnalysisContext<'c>,
    env: TaintEnvironment<SinkKind>,
    triggered_from_forward: &'a TriggeredSinks,
}

impl BackwardPass<'_, '_> {
    fn location(&self, range: ruff_text_size::TextRange) -> Location {
        Location::from_range(range, self.context.line_index())
    }

    /// Projects the final state onto the parameter roots.
    fn into_result(self) -> BackwardResult {
        let mut sink_taint = TaintEnvironment::new();
        let mut taint_in_taint_out = TaintEnvironment::new();
        let mut triggered: BTreeMap<Root, BTreeSet<SinkKind>> = BTreeMap::new();
        let max_trace_length = self.context.max_trace_length();

        for formal in self.context.formals {
            let variable = Root::Variable(CompactString::from(formal.name.as_str()));
            let tree = self.env.read_root(&variable);
            if tree.is_bottom() {
                continue;
            }

            let mut sinks = PathTree::bottom();
            let mut tito = PathTree::bottom();
            tree.fold_tips(&mut |path, tip| {
                let partitions = tip.partition(|kind: &SinkKind| Some(kind.is_tito()));
                let path: AccessPath = path.iter().cloned().collect();
                if let Some(real) = partitions.get(&false) {
                    sinks.join_at(&path, &PathTree::leaf(real.essential(max_trace_length)));
                }
                if let Some(propagated) = partitions.get(&true) {
                    tito.join_at(&path, &PathTree::leaf(propagated.essential(max_trace_length)));
                }
            });

            // Triggered partial sinks on a parameter stay recorded across
            // iterations so callers can complete the pair. Declared
            // partial sinks do not count: only genuinely triggered ones.
            sinks.fold_tips(&mut |_, tip| {
                for (kind, flow) in tip.iter() {
                    if matches!(kind, SinkKind::Partial { .. })
                        && flow.features.contains(&SimpleFeature::Triggered)
                    {
                        triggered
                            .entry(formal.root.clone())
                            .or_default()
                            .insert(kind.clone());
                    }
                }
            });

            if !sinks.is_bottom() {
                sink_taint.assign(&formal.root, &[], sinks);
            }
            if !tito.is_bottom() {
                taint_in_taint_out.assign(&formal.root, &[], tito);
            }
        }

        // User-declared sinks and tito on the model are carried through.
        for (root, tree) in self.context.model.backward.sink_taint.iter() {
            sink_taint.join_at(root, &[], tree);
        }
        for (root, tree) in self.context.model.backward.taint_in_taint_out.iter() {
            taint_in_taint_out.join_at(root, &[], tree);
        }
        for (root, sinks) in &self.context.model.triggered {
            triggered
                .entry(root.clone())
                .or_default()
                .extend(sinks.iter().cloned());
        }

        BackwardResult {
            sink_taint,
            taint_in_taint_out,
            triggered,
        }
    }

    // -- statements (reverse order) -----------------------------------

    fn exec(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign(assign) => {
                let mut taint = PathTree::bottom();
                for target in &assign.targets {
                    taint.join(&self.read_target(target, true));
                }
                self.back_assign(&assign.value, taint);
            }
            Stmt::AnnAssign(assign) => {
                if let Some(value) = &assign.value {
                    let taint = self.read_target(&assign.target, true);
                    self.back_assign(value, taint);
                }
            }
            Stmt::AugAssign(assign) => {
                let taint = self.read_target(&assign.target, false);
                self.back_assign(&assign.value, taint);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    let taint = self.env.read_root(&Root::LocalResult);
                    self.back_assign(value, taint);
                }
            }
            Stmt::Expr(expr) => {
                self.back_assign(&expr.value, PathTree::bottom());
            }
            Stmt::If(if_stmt) => self.exec_if(if_stmt),
            Stmt::While(while_stmt) => {
                self.exec_loop(&while_stmt.body);
                self.back_assign(&while_stmt.test, PathTree::bottom());
            }
            Stmt::For(for_stmt) => {
                self.exec_loop(&for_stmt.body);
                // Taint on the loop variable flows from the iterable's
                // elements.
                let element_taint = self.read_target(&for_stmt.target, true);
                if !element_taint.is_bottom() {
                    let nested = element_taint.prepend(&[PathLabel::AnyIndex]);
                    self.back_assign(&for_stmt.iter, nested);
                } else {
                    self.back_assign(&for_stmt.iter, PathTree::bottom());
                }
            }
            Stmt::With(with_stmt) => {
                for s in with_stmt.body.iter().rev() {
                    self.exec(s);
                }
                for item in &with_stmt.items {
                    let taint = item
                        .optional_vars
                        .as_ref()
                        .map(|vars| self.read_target(vars, true))
                        .unwrap_or_default();
                    self.back_assign(&item.context_expr, taint);
                }
            }
            Stmt::Try(try_stmt) => {
                for s in try_stmt.finalbody.iter().rev() {
                    self.exec(s);
                }
                for s in try_stmt.orelse.iter().rev() {
                    self.exec(s);
                }
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    for s in h.body.iter().rev() {
                        self.exec(s);
                    }
                }
                for s in try_stmt.body.iter().rev() {
                    self.exec(s);
                }
            }
            Stmt::Raise(raise) => {
                if let Some(exc) = &raise.exc {
                    self.back_assign(exc, PathTree::bottom());
                }
            }
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
            _ => {}
        }
    }

    fn exec_if(&mut self, if_stmt: &ast::StmtIf) {
        let entry = self.env.clone();
        for s in if_stmt.body.iter().rev() {
            self.exec(s);
        }
        let mut merged = std::mem::replace(&mut self.env, entry.clone());

        let mut saw_else = false;
        for clause in &if_stmt.elif_else_clauses {
            saw_else |= clause.test.is_none();
            self.env = entry.clone();
            for s in clause.body.iter().rev() {
                self.exec(s);
            }
            merged.join(&self.env);
        }
        if !saw_else {
            merged.join(&entry);
        }
        self.env = merged;
        self.back_assign(&if_stmt.test, PathTree::bottom());
    }

    fn exec_loop(&mut self, body: &[Stmt]) {
        let threshold = self.context.config.constraints.widening_threshold;
        let mut iterations: u32 = 0;
        loop {
            let before = self.env.clone();
            for s in body.iter().rev() {
                self.exec(s);
            }
            self.env.join(&before);
            if self.env.less_or_equal(&before) {
                break;
            }
            iterations += 1;
            if iterations > threshold {
                let snapshot = self.env.clone();
                self.env.widen_with(
                    &snapshot,
                    self.context.max_tree_depth(),
                    self.context.max_trace_length(),
                );
                break;
            }
        }
    }

    /// Reads (and for strong whole-variable reads, kills) the taint
    /// currently assigned to a target expression.
    fn read_target(&mut self, target: &Expr, strong: bool) -> BackwardTaintTree {
        match target {
            Expr::Name(name) => {
                let root = Root::Variable(CompactString::from(name.id.as_str()));
                if strong {
                    self.env.remove(&root).unwrap_or_default()
                } else {
                    self.env.read_root(&root)
                }
            }
            Expr::Attribute(_) | Expr::Subscript(_) => {
                match access_path_of(target) {
                    // Field writes are weak: the rest of the object keeps
                    // its taint.
                    Some((root, path)) => self.env.read(&root, &path),
                    None => PathTree::bottom(),
                }
            }
            Expr::Tuple(tuple) => {
                let mut taint = PathTree::bottom();
                for (index, element) in tuple.elts.iter().enumerate() {
                    let element_taint = self.read_target(element, strong);
                    taint.join_at(&[PathLabel::Index(index as u32)], &element_taint);
                }
                taint
            }
            Expr::List(list) => {
                let mut taint = PathTree::bottom();
                for element in &list.elts {
                    let element_taint = self.read_target(element, strong);
                    taint.join_at(&[PathLabel::AnyIndex], &element_taint);
                }
                taint
            }
            Expr::Starred(starred) => self.read_target(&starred.value, false),
            _ => PathTree::bottom(),
        }
    }

    /// Propagates taint assigned to an expression's value backwards into
    /// its parts.
    fn back_assign(&mut self, expr: &Expr, taint: BackwardTaintTree) {
        match expr {
            Expr::Name(name) => {
                let root = Root::Variable(CompactString::from(name.id.as_str()));
                self.env.join_at(&root, &[], &taint);
            }
            Expr::Attribute(attr) => {
                let nested = taint.prepend(&[PathLabel::Field(CompactString::from(
                    attr.attr.as_str(),
                ))]);
                self.back_assign(&attr.value, nested);
            }
            Expr::Subscript(subscript) => {
                let nested = taint.prepend(&[index_label(&subscript.slice)]);
                self.back_assign(&subscript.value, nested);
                self.back_assign(&subscript.slice, PathTree::bottom());
            }
            Expr::Call(call) => self.handle_call(call, taint),
            Expr::BinOp(binop) => {
                let collapsed = PathTree::leaf(taint.collapse());
                self.back_assign(&binop.left, collapsed.clone());
                self.back_assign(&binop.right, collapsed);
            }
            Expr::BoolOp(boolop) => {
                let collapsed = PathTree::leaf(taint.collapse());
                for value in &boolop.values {
                    self.back_assign(value, collapsed.clone());
                }
            }
            Expr::UnaryOp(unary) => self.back_assign(&unary.operand, taint),
            Expr::If(ifexp) => {
                self.back_assign(&ifexp.body, taint.clone());
                self.back_assign(&ifexp.orelse, taint);
                self.back_assign(&ifexp.test, PathTree::bottom());
            }
            Expr::Tuple(tuple) => {
                for (index, element) in tuple.elts.iter().enumerate() {
                    let label = PathLabel::Index(index as u32);
                    let mut projected = taint.read_tree(&[label.clone()]);
                    extend_return_paths(&mut projected, &label);
                    self.back_assign(element, projected);
                }
            }
            Expr::List(list) => {
                for element in &list.elts {
                    let mut projected = taint.read_tree(&[PathLabel::AnyIndex]);
                    extend_return_paths(&mut projected, &PathLabel::AnyIndex);
                    self.back_assign(element, projected);
                }
            }
            Expr::Set(set) => {
                for element in &set.elts {
                    let mut projected = taint.read_tree(&[PathLabel::AnyIndex]);
                    extend_return_paths(&mut projected, &PathLabel::AnyIndex);
                    self.back_assign(element, projected);
                }
            }
            Expr::Dict(dict) => {
                for item in &dict.items {
                    if let Some(key) = &item.key {
                        let mut key_taint = taint.read_tree(&[PathLabel::DictKeys]);
                        extend_return_paths(&mut key_taint, &PathLabel::DictKeys);
                        self.back_assign(key, key_taint);
                        let label = match key {
                            Expr::StringLiteral(literal) => {
                                PathLabel::Field(CompactString::from(literal.value.to_str()))
                            }
                            _ => PathLabel::AnyIndex,
                        };
                        let mut value_taint = taint.read_tree(&[label.clone()]);
                        extend_return_paths(&mut value_taint, &label);
                        self.back_assign(&item.value, value_taint);
                    } else {
                        self.back_assign(&item.value, taint.clone());
                    }
                }
            }
            Expr::FString(fstring) => {
                let collapsed = PathTree::leaf(taint.collapse());
                for part in &fstring.value {
                    if let ast::FStringPart::FString(f) = part {
                        for element in &f.elements {
                            if let ast::InterpolatedStringElement::Interpolation(interp) = element {
                                self.back_assign(&interp.expression, collapsed.clone());
                            }
                        }
                    }
                }
            }
            Expr::Named(named) => {
                self.back_assign(&named.value, taint);
            }
            Expr::Await(await_expr) => self.back_assign(&await_expr.value, taint),
            Expr::Starred(starred) => {
                self.back_assign(&starred.value, taint.prepend(&[PathLabel::AnyIndex]));
            }
            _ => {}
        }
    }

    /// Call transfer: the callee's sink summary flows into the actuals;
    /// its taint-in-taint-out pulls the call result's taint back into
    /// them; triggered partial sinks from the forward pass are attached.
    fn handle_call(&mut self, call: &ast::ExprCall, result_taint: BackwardTaintTree) {
        let location = self.location(call.range());
        let offset = call.range().start().to_u32();
        let Some(callee_set) = self.context.call_sites.resolve(call).cloned() else {
            self.handle_obscure_call(call, &result_taint);
            return;
        };
        if callee_set.targets.is_empty() {
            self.handle_obscure_call(call, &result_taint);
            return;
        }

        let triggered_here = self.triggered_from_forward.get(&offset);

        for call_target in &callee_set.targets {
            let model = self.context.callee_model(call_target);
            let callees = vec![call_target.target.clone()];
            let bindings = self.context.bindings(call, call_target);

            for binding in &bindings {
                let Some(value) = binding.value else { continue };
                let port_axes = model.port_sanitizers.get(&binding.root).copied();

                // Sinks on the formal flow into the actual.
                if !port_axes.is_some_and(|axes| axes.sinks) {
                    let mut sink_tree = model.backward.sink_taint.read_root(&binding.root);
                    if let Some(triggered) = triggered_here {
                        for (root, sink) in triggered {
                            if *root == binding.root {
                                let mut flow = crate::taint::FlowDetails::declaration();
                                flow.add_feature(SimpleFeature::Triggered);
                                sink_tree.join_tip(&BackwardTaint::singleton_with(
                                    sink.clone(),
                                    flow,
                                ));
                            }
                        }
                    }
                    if !sink_tree.is_bottom() {
                        let applied = apply_call_to_tree(
                            &sink_tree,
                            location,
                            &callees,
                            &binding.root,
                            self.context.max_trace_length(),
                        );
                        self.back_assign(value, applied.prepend(&binding.actual_path));
                    }
                }

                // Tito pulls result taint back into the actual. A callee
                // sanitizing tito blocks the pull; one sanitizing sinks
                // lets only the propagation kinds through.
                let callee_axes = match model.mode {
                    crate::model::Mode::Sanitize(axes) => Some(axes),
                    _ => None,
                };
                let skip_tito = port_axes.is_some_and(|axes| axes.tito)
                    || callee_axes.is_some_and(|axes| axes.tito);
                if !skip_tito {
                    let mut pullable = result_taint.clone();
                    if callee_axes.is_some_and(|axes| axes.sinks) {
                        pullable.transform_tips(&|taint| {
                            taint.retain_kinds(crate::taint::SinkKind::is_tito);
                        });
                    }
                    self.apply_tito_backward(
                        call,
                        call_target,
                        &model,
                        binding,
                        &pullable,
                        location,
                    );
                }
            }
        }
    }

    fn apply_tito_backward(
        &mut self,
        call: &ast::ExprCall,
        call_target: &crate::graph::CallTarget,
        model: &crate::model::Model,
        binding: &super::Binding<'_>,
        result_taint: &BackwardTaintTree,
        location: Location,
    ) {
        let tito_tree = model.backward.taint_in_taint_out.read_root(&binding.root);
        if tito_tree.is_bottom() {
            return;
        }
        let Some(value) = binding.value else { return };

        let mut propagated = PathTree::bottom();
        tito_tree.fold_tips(&mut |tito_path, tip| {
            for (kind, flow) in tip.iter() {
                let pulled = match kind {
                    SinkKind::LocalReturn => {
                        let mut return_paths: Vec<AccessPath> =
                            flow.return_paths().cloned().collect();
                        if return_paths.is_empty() {
                            return_paths.push(smallvec![]);
                        }
                        let mut pulled = BackwardTaint::bottom();
                        for return_path in &return_paths {
                            pulled.join(&result_taint.read(return_path));
                        }
                        pulled
                    }
                    SinkKind::ParameterUpdate(position) => {
                        // Taint already collected on the updated actual
                        // flows back into this argument.
                        match self
                            .context
                            .actual_at_position(call, call_target, *position)
                            .and_then(access_path_of)
                        {
                            Some((root, path)) => self.env.read(&root, &path).collapse(),
                            None => BackwardTaint::bottom(),
                        }
                    }
                    _ => BackwardTaint::bottom(),
                };
                if pulled.is_bottom() {
                    continue;
                }
                let mut pulled = pulled;
                pulled.transform_flows(|_, pulled_flow| {
                    pulled_flow.add_feature(SimpleFeature::TitoPosition(location));
                    for (feature, _) in flow.features.iter() {
                        pulled_flow.add_feature(feature.clone());
                    }
                });
                let mut full_path: AccessPath = binding.actual_path.clone();
                full_path.extend(tito_path.iter().cloned());
                propagated.join_at(&full_path, &PathTree::leaf(pulled));
            }
        });

        if !propagated.is_bottom() {
            self.back_assign(value, propagated);
        }
    }

    /// Unresolved callees: result taint collapses into every argument.
    fn handle_obscure_call(&mut self, call: &ast::ExprCall, result_taint: &BackwardTaintTree) {
        let mut collapsed = result_taint.collapse();
        if collapsed.is_bottom() {
            // Still walk the arguments: nested calls carry their own
            // obligations.
            for arg in &call.arguments.args {
                self.back_assign(arg, PathTree::bottom());
            }
            for keyword in &call.arguments.keywords {
                self.back_assign(&keyword.value, PathTree::bottom());
            }
            return;
        }
        collapsed.add_feature(&SimpleFeature::Obscure);
        let tree = PathTree::leaf(collapsed);
        for arg in &call.arguments.args {
            self.back_assign(arg, tree.clone());
        }
        for keyword in &call.arguments.keywords {
            self.back_assign(&keyword.value, tree.clone());
        }
        if let Expr::Attribute(attr) = &*call.func {
            self.back_assign(&attr.value, tree.clone());
        }
    }
}
