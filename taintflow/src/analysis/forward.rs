//! Forward taint analysis.
//!
//! Interprets a define's body propagating source taint through locals and
//! calls. At each call site the callee's model substitutes argument taint
//! through its taint-in-taint-out, surfaces its return sources, and pairs
//! argument sources against its sink summary to produce issue candidates.

use compact_str::CompactString;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;
use smallvec::smallvec;

use crate::access_path::{AccessPath, PathLabel, Root};
use crate::domains::{AbstractDomain, PathTree};
use crate::model::Model;
use crate::taint::{
    apply_call_to_tree, FlowDetails, ForwardTaint, ForwardTaintTree, SimpleFeature, SourceKind,
    TaintEnvironment, TraceInfo,
};
use crate::target::Target;
use crate::utils::Location;

use super::{AnalysisContext, IssueCandidate, TriggeredSinks};

/// The outputs of one forward pass.
#[derive(Debug)]
pub struct ForwardResult {
    /// Summary environment: sources reaching `LocalResult`, plus the
    /// declared parameter sources carried through.
    pub source_taint: TaintEnvironment<SourceKind>,
    /// Issue candidates discovered at call sites.
    pub candidates: Vec<IssueCandidate>,
    /// Partial sinks triggered by a single matched half, for the
    /// backward pass.
    pub triggered: TriggeredSinks,
}

/// Runs the forward analysis over one define.
#[must_use]
pub fn analyze(context: &AnalysisContext<'_>, define: &ast::StmtFunctionDef) -> ForwardResult {
    let mut pass = ForwardPass {
        context,
        env: TaintEnvironment::new(),
        candidates: Vec::new(),
        triggered: TriggeredSinks::default(),
    };
    pass.seed_parameters(define);
    for stmt in &define.body {
        pass.exec(stmt);
    }

    let mut source_taint = TaintEnvironment::new();
    let result_tree = pass.env.read_root(&Root::LocalResult);
    if !result_tree.is_bottom() {
        let essential = essential_tree(&result_tree, context.max_trace_length());
        source_taint.assign(&Root::LocalResult, &[], essential);
    }
    // Declared parameter sources stay on the model for callers of the
    // parser's output; analysis does not re-derive them.
    for (root, tree) in context.model.parameter_sources() {
        source_taint.join_at(&root, &[], &tree);
    }

    ForwardResult {
        source_taint,
        candidates: pass.candidates,
        triggered: pass.triggered,
    }
}

/// Caps traces and strips transient markers from a summary tree.
fn essential_tree(tree: &ForwardTaintTree, max_trace_length: u32) -> ForwardTaintTree {
    let mut result = tree.clone();
    result.transform_tips(&|taint| *taint = taint.essential(max_trace_length));
    result
}

struct ForwardPass<'a, 'c> {
    context: &'a AnalysisContext<'c>,
    env: TaintEnvironment<SourceKind>,
    candidates: Vec<IssueCandidate>,
    triggered: TriggeredSinks,
}

impl ForwardPass<'_, '_> {
    /// Seeds declared parameter sources into the local environment,
    /// reifying their declarations at the parameter's own location.
    fn seed_parameters(&mut self, define: &ast::StmtFunctionDef) {
        let define_location =
            Location::from_range(define.range(), self.context.line_index());
        for (root, tree) in self.context.model.parameter_sources() {
            let Some(name) = root.parameter_name() else {
                continue;
            };
            let mut seeded = tree.clone();
            seeded.transform_tips(&|taint| {
                taint.transform_flows(|_, flow| {
                    if flow.has_declaration() {
                        flow.trace.remove(&TraceInfo::Declaration);
                        flow.trace.insert(TraceInfo::Origin(define_location));
                    }
                });
            });
            self.env
                .join_at(&Root::Variable(CompactString::from(name)), &[], &seeded);
        }
    }

    fn location(&self, range: ruff_text_size::TextRange) -> Location {
        Location::from_range(range, self.context.line_index())
    }

    // -- statements ---------------------------------------------------

    fn exec(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign(assign) => {
                let tree = self.eval(&assign.value);
                for target in &assign.targets {
                    self.assign_target(target, tree.clone(), true);
                }
            }
            Stmt::AnnAssign(assign) => {
                if let Some(value) = &assign.value {
                    let tree = self.eval(value);
                    self.assign_target(&assign.target, tree, true);
                }
            }
            Stmt::AugAssign(assign) => {
                let tree = self.eval(&assign.value);
                self.assign_target(&assign.target, tree, false);
            }
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    let tree = self.eval(value);
                    self.env.join_at(&Root::LocalResult, &[], &tree);
                }
            }
            Stmt::Expr(expr) => {
                let _ = self.eval(&expr.value);
            }
            Stmt::If(if_stmt) => self.exec_if(if_stmt),
            Stmt::While(while_stmt) => {
                let _ = self.eval(&while_stmt.test);
                self.exec_loop(&while_stmt.body);
                for s in &while_stmt.orelse {
                    self.exec(s);
                }
            }
            Stmt::For(for_stmt) => {
                let iter_tree = self.eval(&for_stmt.iter);
                let element = iter_tree.read_tree(&[PathLabel::AnyIndex]);
                self.assign_target(&for_stmt.target, element, false);
                self.exec_loop(&for_stmt.body);
                for s in &for_stmt.orelse {
                    self.exec(s);
                }
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    let tree = self.eval(&item.context_expr);
                    if let Some(vars) = &item.optional_vars {
                        self.assign_target(vars, tree, true);
                    }
                }
                for s in &with_stmt.body {
                    self.exec(s);
                }
            }
            Stmt::Try(try_stmt) => {
                for s in &try_stmt.body {
                    self.exec(s);
                }
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    for s in &h.body {
                        self.exec(s);
                    }
                }
                for s in &try_stmt.orelse {
                    self.exec(s);
                }
                for s in &try_stmt.finalbody {
                    self.exec(s);
                }
            }
            Stmt::Raise(raise) => {
                if let Some(exc) = &raise.exc {
                    let _ = self.eval(exc);
                }
            }
            // Nested defines are separate callables with their own models.
            Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
            _ => {}
        }
    }

    /// Branch states fork from the current one and merge pointwise.
    fn exec_if(&mut self, if_stmt: &ast::StmtIf) {
        let _ = self.eval(&if_stmt.test);

        let entry = self.env.clone();
        for s in &if_stmt.body {
            self.exec(s);
        }
        let mut merged = std::mem::replace(&mut self.env, entry.clone());

        let mut saw_else = false;
        for clause in &if_stmt.elif_else_clauses {
            saw_else |= clause.test.is_none();
            if let Some(test) = &clause.test {
                let _ = self.eval(test);
            }
            self.env = entry.clone();
            for s in &clause.body {
                self.exec(s);
            }
            merged.join(&self.env);
        }
        if !saw_else {
            // The fall-through path keeps the entry state.
            merged.join(&entry);
        }
        self.env = merged;
    }

    /// Loops re-interpret their body until the state stabilizes; past the
    /// widening threshold the state is widened to force convergence.
    fn exec_loop(&mut self, body: &[Stmt]) {
        let threshold = self.context.config.constraints.widening_threshold;
        let mut iterations: u32 = 0;
        loop {
            let before = self.env.clone();
            for s in body {
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

    /// Writes a tree to an assignment target. Whole-variable writes are
    /// strong; field writes and unpacking are weak.
    fn assign_target(&mut self, target: &Expr, tree: ForwardTaintTree, strong: bool) {
        match target {
            Expr::Name(name) => {
                let root = Root::Variable(CompactString::from(name.id.as_str()));
                if strong {
                    self.env.assign(&root, &[], tree);
                } else {
                    self.env.join_at(&root, &[], &tree);
                }
            }
            Expr::Attribute(_) | Expr::Subscript(_) => {
                if let Some((root, path)) = access_path_of(target) {
                    self.env.join_at(&root, &path, &tree);
                }
            }
            Expr::Tuple(tuple) => {
                for (index, element) in tuple.elts.iter().enumerate() {
                    let projected = tree.read_tree(&[PathLabel::Index(index as u32)]);
                    self.assign_target(element, projected, strong);
                }
            }
            Expr::List(list) => {
                for element in &list.elts {
                    let projected = tree.read_tree(&[PathLabel::AnyIndex]);
                    self.assign_target(element, projected, strong);
                }
            }
            Expr::Starred(starred) => {
                self.assign_target(&starred.value, tree, false);
            }
            _ => {}
        }
    }

    // -- expressions --------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> ForwardTaintTree {
        match expr {
            Expr::Name(name) => self.eval_name(name),
            Expr::Attribute(attr) => {
                let base = self.eval(&attr.value);
                base.read_tree(&[PathLabel::Field(CompactString::from(attr.attr.as_str()))])
            }
            Expr::Subscript(subscript) => {
                let base = self.eval(&subscript.value);
                base.read_tree(&[index_label(&subscript.slice)])
            }
            Expr::Call(call) => self.handle_call(call),
            Expr::BinOp(binop) => {
                let mut tree = self.eval(&binop.left);
                tree.join(&self.eval(&binop.right));
                tree
            }
            Expr::BoolOp(boolop) => {
                let mut tree = ForwardTaintTree::bottom();
                for value in &boolop.values {
                    tree.join(&self.eval(value));
                }
                tree
            }
            Expr::UnaryOp(unary) => self.eval(&unary.operand),
            Expr::If(ifexp) => {
                let _ = self.eval(&ifexp.test);
                let mut tree = self.eval(&ifexp.body);
                tree.join(&self.eval(&ifexp.orelse));
                tree
            }
            Expr::Tuple(tuple) => {
                let mut tree = ForwardTaintTree::bottom();
                for (index, element) in tuple.elts.iter().enumerate() {
                    let element_tree = self.eval(element);
                    tree.join_at(&[PathLabel::Index(index as u32)], &element_tree);
                }
                tree
            }
            Expr::List(list) => {
                let mut tree = ForwardTaintTree::bottom();
                for element in &list.elts {
                    let element_tree = self.eval(element);
                    tree.join_at(&[PathLabel::AnyIndex], &element_tree);
                }
                tree
            }
            Expr::Set(set) => {
                let mut tree = ForwardTaintTree::bottom();
                for element in &set.elts {
                    let element_tree = self.eval(element);
                    tree.join_at(&[PathLabel::AnyIndex], &element_tree);
                }
                tree
            }
            Expr::Dict(dict) => {
                let mut tree = ForwardTaintTree::bottom();
                for item in &dict.items {
                    match &item.key {
                        Some(key) => {
                            let key_tree = self.eval(key);
                            tree.join_at(&[PathLabel::DictKeys], &key_tree);
                            let label = match key {
                                Expr::StringLiteral(literal) => PathLabel::Field(
                                    CompactString::from(literal.value.to_str()),
                                ),
                                _ => PathLabel::AnyIndex,
                            };
                            let value_tree = self.eval(&item.value);
                            tree.join_at(&[label], &value_tree);
                        }
                        // `**mapping` splat.
                        None => {
                            let value_tree = self.eval(&item.value);
                            tree.join(&value_tree);
                        }
                    }
                }
                tree
            }
            Expr::FString(fstring) => {
                let mut taint = ForwardTaint::bottom();
                for part in &fstring.value {
                    if let ast::FStringPart::FString(f) = part {
                        for element in &f.elements {
                            if let ast::InterpolatedStringElement::Interpolation(interp) = element {
                                taint.join(&self.eval(&interp.expression).collapse());
                            }
                        }
                    }
                }
                PathTree::leaf(taint)
            }
            Expr::StringLiteral(literal) => self.literal_sources(literal.range()),
            Expr::Named(named) => {
                let tree = self.eval(&named.value);
                self.assign_target(&named.target, tree.clone(), true);
                tree
            }
            Expr::Await(await_expr) => self.eval(&await_expr.value),
            Expr::Starred(starred) => self.eval(&starred.value),
            Expr::ListComp(comp) => self.eval_comprehension(&comp.generators),
            Expr::SetComp(comp) => self.eval_comprehension(&comp.generators),
            Expr::Generator(comp) => self.eval_comprehension(&comp.generators),
            Expr::DictComp(comp) => self.eval_comprehension(&comp.generators),
            _ => ForwardTaintTree::bottom(),
        }
    }

    fn eval_name(&mut self, name: &ast::ExprName) -> ForwardTaintTree {
        let root = Root::Variable(CompactString::from(name.id.as_str()));
        let tree = self.env.read_root(&root);
        if !tree.is_bottom() {
            return tree;
        }
        // A read of an untracked name may be a tainted module global.
        let qualified = format!("{}.{}", self.context.module.name, name.id.as_str());
        if let Some(model) = self.context.store.get(&Target::Object(qualified.into())) {
            let object_tree = model.forward.source_taint.read_root(&Root::LocalResult);
            if !object_tree.is_bottom() {
                let location = self.location(name.range());
                let mut reified = object_tree;
                reified.transform_tips(&|taint| {
                    taint.transform_flows(|_, flow| {
                        if flow.has_declaration() {
                            flow.trace.remove(&TraceInfo::Declaration);
                            flow.trace.insert(TraceInfo::Origin(location));
                        }
                    });
                });
                return reified;
            }
        }
        ForwardTaintTree::bottom()
    }

    /// Implicit sources configured for string literals.
    fn literal_sources(&self, range: ruff_text_size::TextRange) -> ForwardTaintTree {
        if self.context.config.literal_string_sources.is_empty() {
            return ForwardTaintTree::bottom();
        }
        let location = self.location(range);
        let mut taint = ForwardTaint::bottom();
        for kind in &self.context.config.literal_string_sources {
            taint.add(kind.clone(), FlowDetails::origin(location));
        }
        PathTree::leaf(taint)
    }

    /// Comprehensions approximate to the join of their iterables' element
    /// taint.
    fn eval_comprehension(&mut self, generators: &[ast::Comprehension]) -> ForwardTaintTree {
        let mut tree = ForwardTaintTree::bottom();
        for generator in generators {
            let iter_tree = self.eval(&generator.iter);
            tree.join_at(&[PathLabel::AnyIndex], &iter_tree.read_tree(&[PathLabel::AnyIndex]));
        }
        tree
    }

    // -- calls --------------------------------------------------------

    fn handle_call(&mut self, call: &ast::ExprCall) -> ForwardTaintTree {
        let location = self.location(call.range());
        let Some(callee_set) = self.context.call_sites.resolve(call).cloned() else {
            return self.handle_obscure_call(call);
        };
        if callee_set.targets.is_empty() {
            return self.handle_obscure_call(call);
        }

        // Arguments are evaluated once per call; candidate targets reuse
        // the cached trees so nested calls run their side effects once.
        let mut cache: rustc_hash::FxHashMap<usize, ForwardTaintTree> =
            rustc_hash::FxHashMap::default();
        for arg in &call.arguments.args {
            let expr: &Expr = match arg {
                Expr::Starred(starred) => &starred.value,
                other => other,
            };
            let tree = self.eval(expr);
            cache.insert(std::ptr::from_ref(expr) as usize, tree);
        }
        for keyword in &call.arguments.keywords {
            let tree = self.eval(&keyword.value);
            cache.insert(std::ptr::from_ref(&keyword.value) as usize, tree);
        }
        if let Expr::Attribute(attr) = &*call.func {
            let tree = self.eval(&attr.value);
            cache.insert(std::ptr::from_ref(&*attr.value) as usize, tree);
        }

        let mut result = ForwardTaintTree::bottom();
        for call_target in &callee_set.targets {
            let model = self.context.callee_model(call_target);
            let callees = vec![call_target.target.clone()];
            let bindings = self.context.bindings(call, call_target);

            // Combined-source pairing state for this (call, target).
            let mut per_binding = Vec::new();

            for binding in &bindings {
                let arg_tree = match binding.value {
                    Some(value) => cache
                        .get(&(std::ptr::from_ref(value) as usize))
                        .map(|tree| tree.read_tree(&binding.actual_path))
                        .unwrap_or_default(),
                    None => ForwardTaintTree::bottom(),
                };

                let port_axes = model.port_sanitizers.get(&binding.root).copied();

                // Sink summary at this formal: issue candidates.
                let skip_sinks = port_axes.is_some_and(|axes| axes.sinks);
                let mut sink_tree = model.backward.sink_taint.read_root(&binding.root);
                if let Some(triggered) = model.triggered.get(&binding.root) {
                    for sink in triggered {
                        sink_tree.join_tip(&crate::taint::BackwardTaint::singleton(sink.clone()));
                    }
                }
                if !skip_sinks && !sink_tree.is_bottom() && !arg_tree.is_bottom() {
                    let applied = apply_call_to_tree(
                        &sink_tree,
                        location,
                        &callees,
                        &binding.root,
                        self.context.max_trace_length(),
                    );
                    self.candidates.push(IssueCandidate {
                        location,
                        callee: call_target.target.clone(),
                        port: binding.root.clone(),
                        forward: arg_tree.clone(),
                        backward: applied,
                        combined_code: None,
                    });
                }

                // Taint-in-taint-out into the return value or a sibling
                // argument. A sanitizing callee blocks source taint from
                // passing through.
                let callee_sanitizes = matches!(
                    model.mode,
                    crate::model::Mode::Sanitize(axes) if axes.tito || axes.sources
                );
                let skip_tito = callee_sanitizes || port_axes.is_some_and(|axes| axes.tito);
                if !skip_tito && !arg_tree.is_bottom() {
                    self.apply_tito(
                        call,
                        call_target,
                        &model,
                        binding.root.clone(),
                        &arg_tree,
                        location,
                        &mut result,
                    );
                }

                per_binding.push((binding.root.clone(), arg_tree, sink_tree));
            }

            self.check_combined_rules(call, &call_target.target, &model, location, &per_binding);

            // The callee's return sources.
            let return_sources = model.forward.source_taint.read_root(&Root::LocalResult);
            if !return_sources.is_bottom() {
                let applied = apply_call_to_tree(
                    &return_sources,
                    location,
                    &callees,
                    &Root::LocalResult,
                    self.context.max_trace_length(),
                );
                result.join(&applied);
            }
        }
        result
    }

    /// Calls with no resolvable callee conservatively propagate every
    /// argument, collapsed, into the result.
    fn handle_obscure_call(&mut self, call: &ast::ExprCall) -> ForwardTaintTree {
        let mut taint = ForwardTaint::bottom();
        for arg in &call.arguments.args {
            taint.join(&self.eval(arg).collapse());
        }
        for keyword in &call.arguments.keywords {
            taint.join(&self.eval(&keyword.value).collapse());
        }
        if let Expr::Attribute(attr) = &*call.func {
            // A method on a tainted receiver taints the result.
            taint.join(&self.eval(&attr.value).collapse());
        }
        if taint.is_bottom() {
            return ForwardTaintTree::bottom();
        }
        taint.add_feature(&SimpleFeature::Obscure);
        PathTree::leaf(taint)
    }

    /// Routes one argument's taint through the callee's tito summary.
    #[allow(clippy::too_many_arguments)]
    fn apply_tito(
        &mut self,
        call: &ast::ExprCall,
        call_target: &crate::graph::CallTarget,
        model: &Model,
        formal: Root,
        arg_tree: &ForwardTaintTree,
        location: Location,
        result: &mut ForwardTaintTree,
    ) {
        let tito_tree = model.backward.taint_in_taint_out.read_root(&formal);
        if tito_tree.is_bottom() {
            return;
        }
        let attached = model.attach_features.get(&formal);

        tito_tree.fold_tips(&mut |tito_path, tip| {
            for (kind, flow) in tip.iter() {
                let input = arg_tree.read(tito_path);
                if input.is_bottom() {
                    continue;
                }
                let mut contribution = input;
                contribution.transform_flows(|_, arg_flow| {
                    arg_flow.add_feature(SimpleFeature::TitoPosition(location));
                    for (feature, _) in flow.features.iter() {
                        arg_flow.add_feature(feature.clone());
                    }
                    if let Some(features) = attached {
                        for feature in features {
                            arg_flow.add_feature(feature.clone());
                        }
                    }
                });

                match kind {
                    crate::taint::SinkKind::LocalReturn => {
                        let mut return_paths: Vec<AccessPath> =
                            flow.return_paths().cloned().collect();
                        if return_paths.is_empty() {
                            return_paths.push(smallvec![]);
                        }
                        for return_path in return_paths {
                            result.join_at(&return_path, &PathTree::leaf(contribution.clone()));
                        }
                    }
                    crate::taint::SinkKind::ParameterUpdate(position) => {
                        if let Some(updated) =
                            self.context.actual_at_position(call, call_target, *position)
                        {
                            if let Some((root, path)) = access_path_of(updated) {
                                self.env.join_at(
                                    &root,
                                    &path,
                                    &PathTree::leaf(contribution.clone()),
                                );
                            }
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    /// Combined-source rules: both halves present at one call emit an
    /// issue; a single matched half triggers the other for the backward
    /// pass (and completes pairs already triggered on the callee).
    fn check_combined_rules(
        &mut self,
        call: &ast::ExprCall,
        callee: &Target,
        model: &Model,
        location: Location,
        per_binding: &[(Root, ForwardTaintTree, crate::taint::BackwardTaintTree)],
    ) {
        let rules: Vec<&crate::config::Rule> = self
            .context
            .config
            .rules
            .iter()
            .filter(|rule| rule.combined.is_some())
            .collect();
        if rules.is_empty() {
            return;
        }

        for rule in rules {
            let Some(halves) = &rule.combined else { continue };
            let mut matched = Vec::new();
            let mut unmatched = Vec::new();

            for half in halves {
                let hit = per_binding.iter().find_map(|(root, arg_tree, sink_tree)| {
                    if !sink_tree.collapse().contains(&half.sink) {
                        return None;
                    }
                    let collapsed = arg_tree.collapse();
                    let filtered: ForwardTaint = half
                        .sources
                        .iter()
                        .filter_map(|source| {
                            collapsed
                                .get(source)
                                .map(|flow| (source.clone(), flow.clone()))
                        })
                        .fold(ForwardTaint::bottom(), |mut acc, (kind, flow)| {
                            acc.add(kind, flow);
                            acc
                        });
                    if filtered.is_bottom() {
                        None
                    } else {
                        Some((root.clone(), filtered))
                    }
                });
                match hit {
                    Some(hit) => matched.push((half, hit)),
                    None => unmatched.push(half),
                }
            }

            if unmatched.is_empty() && !matched.is_empty() {
                // Every half fed: a combined issue.
                let mut forward = ForwardTaintTree::bottom();
                let mut backward_tip = crate::taint::BackwardTaint::bottom();
                let mut port = None;
                for (half, (root, filtered)) in &matched {
                    forward.join_tip(filtered);
                    backward_tip.add(half.sink.clone(), FlowDetails::origin(location));
                    port.get_or_insert_with(|| root.clone());
                }
                self.candidates.push(IssueCandidate {
                    location,
                    callee: callee.clone(),
                    port: port.unwrap_or(Root::LocalResult),
                    forward,
                    backward: PathTree::leaf(backward_tip),
                    combined_code: Some(rule.code),
                });
            } else if matched.len() == halves.len() - 1 && unmatched.len() == 1 {
                // One half short. If a matched half landed on a sink the
                // callee carries as *triggered*, the other half already
                // arrived deeper in the call chain: the pair completes
                // here. Otherwise, trigger the missing half's sink for
                // the backward pass.
                let completed = matched.iter().any(|(half, (root, _))| {
                    model
                        .triggered
                        .get(root)
                        .is_some_and(|sinks| sinks.contains(&half.sink))
                });
                if completed {
                    let mut forward = ForwardTaintTree::bottom();
                    let mut backward_tip = crate::taint::BackwardTaint::bottom();
                    let mut port = None;
                    for (half, (root, filtered)) in &matched {
                        forward.join_tip(filtered);
                        backward_tip.add(half.sink.clone(), FlowDetails::origin(location));
                        port.get_or_insert_with(|| root.clone());
                    }
                    backward_tip.add(unmatched[0].sink.clone(), FlowDetails::origin(location));
                    self.candidates.push(IssueCandidate {
                        location,
                        callee: callee.clone(),
                        port: port.unwrap_or(Root::LocalResult),
                        forward,
                        backward: PathTree::leaf(backward_tip),
                        combined_code: Some(rule.code),
                    });
                } else {
                    let missing = unmatched[0];
                    let carrier = per_binding
                        .iter()
                        .find(|(_, _, sink_tree)| sink_tree.collapse().contains(&missing.sink));
                    if let Some((root, _, _)) = carrier {
                        self.triggered
                            .entry(call.range().start().to_u32())
                            .or_default()
                            .push((root.clone(), missing.sink.clone()));
                    }
                }
            }
        }
    }
}

/// The `(root, path)` a storable expression denotes, if any.
#[must_use]
pub fn access_path_of(expr: &Expr) -> Option<(Root, AccessPath)> {
    match expr {
        Expr::Name(name) => Some((
            Root::Variable(CompactString::from(name.id.as_str())),
            AccessPath::new(),
        )),
        Expr::Attribute(attr) => {
            let (root, mut path) = access_path_of(&attr.value)?;
            path.push(PathLabel::Field(CompactString::from(attr.attr.as_str())));
            Some((root, path))
        }
        Expr::Subscript(subscript) => {
            let (root, mut path) = access_path_of(&subscript.value)?;
            path.push(index_label(&subscript.slice));
            Some((root, path))
        }
        Expr::Starred(starred) => access_path_of(&starred.value),
        Expr::Named(named) => access_path_of(&named.target),
        _ => None,
    }
}

/// The tree label a subscript index denotes.
#[must_use]
pub fn index_label(slice: &Expr) -> PathLabel {
    match slice {
        Expr::NumberLiteral(number) => {
            if let ast::Number::Int(int) = &number.value {
                if let Ok(index) = int.to_string().parse::<u32>() {
                    return PathLabel::Index(index);
                }
            }
            PathLabel::AnyIndex
        }
        Expr::StringLiteral(literal) => {
            PathLabel::Field(CompactString::from(literal.value.to_str()))
        }
        _ => PathLabel::AnyIndex,
    }
}
