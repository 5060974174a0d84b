//! Per-define call graphs.
//!
//! For each callable body, every call expression resolves to a set of
//! candidate targets using the external resolver: direct names through
//! imports, receiver-typed method dispatch, override join points where
//! static dispatch cannot be proven. Unresolved callees are recorded as
//! "untracked" diagnostics, not failures.

use compact_str::CompactString;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;
use rustc_hash::FxHashMap;

use crate::access_path::{Formal, Root};
use crate::resolver::{dotted_name, AstResolver, Resolver};
use crate::target::Target;

/// One candidate callee with the formals used for argument matching.
#[derive(Debug, Clone)]
pub struct CallTarget {
    /// The resolved target.
    pub target: Target,
    /// Its formal parameters. Synthesized when the target has no body
    /// (inferred constructors, obscure callables).
    pub formals: Vec<Formal>,
    /// Whether the receiver is passed implicitly (bound method call).
    pub implicit_receiver: bool,
}

/// The candidate callees of one call site.
#[derive(Debug, Clone, Default)]
pub struct CalleeSet {
    /// Candidate targets in canonical order.
    pub targets: Vec<CallTarget>,
    /// Whether resolution failed and the set is conservative.
    pub unresolved: bool,
}

impl CalleeSet {
    /// The bare targets, for trace recording.
    #[must_use]
    pub fn raw_targets(&self) -> Vec<Target> {
        self.targets.iter().map(|ct| ct.target.clone()).collect()
    }
}

/// Call sites of one define, keyed by the byte offset of the call node.
#[derive(Debug, Clone, Default)]
pub struct CallSites {
    map: FxHashMap<u32, CalleeSet>,
    /// Callee names that could not be resolved, for diagnostics.
    pub untracked: Vec<CompactString>,
}

impl CallSites {
    /// The callee set at a call expression, if resolution recorded one.
    #[must_use]
    pub fn resolve(&self, call: &ast::ExprCall) -> Option<&CalleeSet> {
        self.map.get(&call.range().start().to_u32())
    }

    /// Every resolved target across the define, deduplicated.
    #[must_use]
    pub fn all_targets(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .map
            .values()
            .flat_map(|set| set.targets.iter().map(|ct| ct.target.clone()))
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }
}

/// Builds the call sites of one define.
pub struct DefineCallGraphBuilder<'a> {
    resolver: &'a AstResolver,
    module: &'a str,
    /// The class owning the analyzed method, if any.
    current_class: Option<CompactString>,
    /// Local variable types inferred from constructor assignments.
    local_types: FxHashMap<CompactString, CompactString>,
    sites: CallSites,
}

impl<'a> DefineCallGraphBuilder<'a> {
    /// Creates a builder for a define in `module`, owned by
    /// `current_class` when it is a method.
    #[must_use]
    pub fn new(
        resolver: &'a AstResolver,
        module: &'a str,
        current_class: Option<CompactString>,
    ) -> Self {
        Self {
            resolver,
            module,
            current_class,
            local_types: FxHashMap::default(),
            sites: CallSites::default(),
        }
    }

    /// Walks a define body and returns its call sites.
    #[must_use]
    pub fn build(mut self, func: &ast::StmtFunctionDef) -> CallSites {
        // Annotated parameters seed the local type environment.
        for param in func.parameters.posonlyargs.iter().chain(&func.parameters.args) {
            if let Some(annotation) = &param.parameter.annotation {
                if let Some(name) = dotted_name(annotation) {
                    if let Some(class) = self.resolver.resolve_class(self.module, &name) {
                        self.local_types
                            .insert(CompactString::from(param.parameter.name.as_str()), class);
                    }
                }
            }
        }
        if let Some(class) = &self.current_class {
            self.local_types
                .insert(CompactString::from("self"), class.clone());
        }
        for stmt in &func.body {
            self.visit_stmt(stmt);
        }
        self.sites
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Assign(assign) => {
                self.visit_expr(&assign.value);
                // `x = Class(...)` types the local for later dispatch.
                if let Expr::Call(call) = &*assign.value {
                    if let Some(class) = self.constructed_class(call) {
                        for target in &assign.targets {
                            if let Expr::Name(name) = target {
                                self.local_types
                                    .insert(CompactString::from(name.id.as_str()), class.clone());
                            }
                        }
                    }
                }
            }
            Stmt::AnnAssign(assign) => {
                if let Some(value) = &assign.value {
                    self.visit_expr(value);
                }
                if let Some(name) = dotted_name(&assign.annotation) {
                    if let Some(class) = self.resolver.resolve_class(self.module, &name) {
                        if let Expr::Name(target) = &*assign.target {
                            self.local_types
                                .insert(CompactString::from(target.id.as_str()), class);
                        }
                    }
                }
            }
            Stmt::AugAssign(assign) => self.visit_expr(&assign.value),
            Stmt::Expr(expr) => self.visit_expr(&expr.value),
            Stmt::Return(ret) => {
                if let Some(value) = &ret.value {
                    self.visit_expr(value);
                }
            }
            Stmt::If(if_stmt) => {
                self.visit_expr(&if_stmt.test);
                for s in &if_stmt.body {
                    self.visit_stmt(s);
                }
                for clause in &if_stmt.elif_else_clauses {
                    if let Some(test) = &clause.test {
                        self.visit_expr(test);
                    }
                    for s in &clause.body {
                        self.visit_stmt(s);
                    }
                }
            }
            Stmt::For(for_stmt) => {
                self.visit_expr(&for_stmt.iter);
                for s in &for_stmt.body {
                    self.visit_stmt(s);
                }
                for s in &for_stmt.orelse {
                    self.visit_stmt(s);
                }
            }
            Stmt::While(while_stmt) => {
                self.visit_expr(&while_stmt.test);
                for s in &while_stmt.body {
                    self.visit_stmt(s);
                }
                for s in &while_stmt.orelse {
                    self.visit_stmt(s);
                }
            }
            Stmt::With(with_stmt) => {
                for item in &with_stmt.items {
                    self.visit_expr(&item.context_expr);
                }
                for s in &with_stmt.body {
                    self.visit_stmt(s);
                }
            }
            Stmt::Try(try_stmt) => {
                for s in &try_stmt.body {
                    self.visit_stmt(s);
                }
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(h) = handler;
                    for s in &h.body {
                        self.visit_stmt(s);
                    }
                }
                for s in &try_stmt.orelse {
                    self.visit_stmt(s);
                }
                for s in &try_stmt.finalbody {
                    self.visit_stmt(s);
                }
            }
            Stmt::Raise(raise) => {
                if let Some(exc) = &raise.exc {
                    self.visit_expr(exc);
                }
            }
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call(call) => {
                self.record_call(call);
                for arg in &call.arguments.args {
                    self.visit_expr(arg);
                }
                for keyword in &call.arguments.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            Expr::BinOp(binop) => {
                self.visit_expr(&binop.left);
                self.visit_expr(&binop.right);
            }
            Expr::BoolOp(boolop) => {
                for value in &boolop.values {
                    self.visit_expr(value);
                }
            }
            Expr::UnaryOp(unary) => self.visit_expr(&unary.operand),
            Expr::If(ifexp) => {
                self.visit_expr(&ifexp.test);
                self.visit_expr(&ifexp.body);
                self.visit_expr(&ifexp.orelse);
            }
            Expr::Tuple(tuple) => {
                for elt in &tuple.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::List(list) => {
                for elt in &list.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Set(set) => {
                for elt in &set.elts {
                    self.visit_expr(elt);
                }
            }
            Expr::Dict(dict) => {
                for item in &dict.items {
                    if let Some(key) = &item.key {
                        self.visit_expr(key);
                    }
                    self.visit_expr(&item.value);
                }
            }
            Expr::Subscript(subscript) => {
                self.visit_expr(&subscript.value);
                self.visit_expr(&subscript.slice);
            }
            Expr::Attribute(attr) => self.visit_expr(&attr.value),
            Expr::Starred(starred) => self.visit_expr(&starred.value),
            Expr::Await(await_expr) => self.visit_expr(&await_expr.value),
            Expr::FString(fstring) => {
                for part in &fstring.value {
                    if let ast::FStringPart::FString(f) = part {
                        for element in &f.elements {
                            if let ast::InterpolatedStringElement::Interpolation(interp) = element {
                                self.visit_expr(&interp.expression);
                            }
                        }
                    }
                }
            }
            Expr::Named(named) => self.visit_expr(&named.value),
            _ => {}
        }
    }

    /// Resolves one call expression to its candidate targets.
    fn record_call(&mut self, call: &ast::ExprCall) {
        let mut set = CalleeSet::default();

        match &*call.func {
            Expr::Name(name) => {
                if let Some(target) = self
                    .resolver
                    .resolve_callable(self.module, name.id.as_str())
                {
                    self.push_target(&mut set, target, false);
                } else {
                    set.unresolved = true;
                    self.sites
                        .untracked
                        .push(CompactString::from(name.id.as_str()));
                }
            }
            Expr::Attribute(attr) => {
                if let Expr::Name(receiver) = &*attr.value {
                    let receiver_name = receiver.id.as_str();
                    if let Some(class) = self.local_types.get(receiver_name).cloned() {
                        // Receiver type known: method dispatch, joined
                        // over overrides when any exist.
                        self.record_method_call(&mut set, &class, attr.attr.as_str());
                    } else if let Some(target) = self.resolver.resolve_callable(
                        self.module,
                        &format!("{receiver_name}.{}", attr.attr.as_str()),
                    ) {
                        self.push_target(&mut set, target, false);
                    } else {
                        set.unresolved = true;
                        self.sites.untracked.push(CompactString::from(format!(
                            "{receiver_name}.{}",
                            attr.attr.as_str()
                        )));
                    }
                } else if let Some(name) = dotted_name(&attr.value) {
                    let full = format!("{name}.{}", attr.attr.as_str());
                    if let Some(target) = self.resolver.resolve_callable(self.module, &full) {
                        self.push_target(&mut set, target, false);
                    } else {
                        set.unresolved = true;
                        self.sites.untracked.push(CompactString::from(full));
                    }
                } else {
                    set.unresolved = true;
                    self.sites
                        .untracked
                        .push(CompactString::from(attr.attr.as_str()));
                }
            }
            _ => {
                set.unresolved = true;
            }
        }

        self.sites.map.insert(call.range().start().to_u32(), set);
    }

    /// Dispatch on a typed receiver: the concrete method when it is
    /// final, the override join point otherwise.
    fn record_method_call(&mut self, set: &mut CalleeSet, class: &str, method: &str) {
        let Some(defining) = self.resolver.method_defining_class(class, method) else {
            set.unresolved = true;
            self.sites
                .untracked
                .push(CompactString::from(format!("{class}.{method}")));
            return;
        };
        let overrides = self.resolver.overrides(&defining, method);
        let target = if overrides.is_empty() {
            Target::method(defining, method)
        } else {
            Target::override_(defining, method)
        };
        self.push_target(set, target, true);
    }

    fn push_target(&self, set: &mut CalleeSet, target: Target, bound_call: bool) {
        let formals = self.formals_for(&target);
        // Constructor calls bind the fresh object to the receiver slot
        // implicitly, exactly like bound method calls.
        let implicit_receiver = bound_call
            || matches!(&target, Target::Method { name, .. } if name == "__init__");
        set.targets.push(CallTarget {
            target,
            formals,
            implicit_receiver,
        });
    }

    /// The formals of a target, synthesized from class attributes for
    /// bodiless constructors.
    fn formals_for(&self, target: &Target) -> Vec<Formal> {
        if let Some(record) = self.resolver.define_record(target) {
            return record.parameters.clone();
        }
        if let Target::Method { class, name } = target {
            if name == "__init__" {
                if let Some(record) = self.resolver.class_record(class) {
                    let mut formals = vec![Formal {
                        root: Root::PositionalParameter {
                            position: 0,
                            name: CompactString::from("self"),
                        },
                        name: CompactString::from("self"),
                    }];
                    for (index, attribute) in record.attributes.iter().enumerate() {
                        formals.push(Formal {
                            root: Root::PositionalParameter {
                                position: (index + 1) as u32,
                                name: attribute.clone(),
                            },
                            name: attribute.clone(),
                        });
                    }
                    return formals;
                }
            }
        }
        Vec::new()
    }

    /// The class a constructor call produces, if the callee is one.
    fn constructed_class(&self, call: &ast::ExprCall) -> Option<CompactString> {
        let name = dotted_name(&call.func)?;
        self.resolver.resolve_class(self.module, &name)
    }
}
