//! Name resolution.
//!
//! The engine treats the type checker as an external collaborator behind
//! the read-only [`Resolver`] query surface. [`AstResolver`] is the
//! in-tree implementation: a symbol index over the parsed modules with
//! import tables, class hierarchies and callable signatures.

use std::path::PathBuf;

use compact_str::CompactString;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::access_path::{normalize_parameters, Formal};
use crate::target::Target;
use crate::utils::LineIndex;

/// A parsed source module, owned by the driver.
#[derive(Debug)]
pub struct ParsedModule {
    /// Dotted module name.
    pub name: String,
    /// Path the module was read from.
    pub path: PathBuf,
    /// The parsed syntax tree.
    pub module: ast::ModModule,
    /// Line index over the original source.
    pub line_index: LineIndex,
}

/// The read-only query surface of the external name resolver.
pub trait Resolver {
    /// Resolves a possibly dotted name, as written in `module`, to a
    /// callable target.
    fn resolve_callable(&self, module: &str, name: &str) -> Option<Target>;

    /// Resolves a possibly dotted name to a qualified class.
    fn resolve_class(&self, module: &str, name: &str) -> Option<CompactString>;

    /// The callables a module defines, in source order.
    fn defines(&self, module: &str) -> Vec<Target>;

    /// The declared attributes of a class, in declaration order.
    fn attributes(&self, class: &str) -> Vec<CompactString>;

    /// The formal parameters of a callable.
    fn parameters(&self, target: &Target) -> Option<Vec<Formal>>;

    /// Whether `sub` is `sup` or a transitive subclass of it.
    fn is_subclass(&self, sub: &str, sup: &str) -> bool;

    /// Transitive superclasses, nearest first.
    fn superclasses(&self, class: &str) -> Vec<CompactString>;

    /// The concrete methods overriding `class.method`, transitively.
    fn overrides(&self, class: &str, method: &str) -> Vec<Target>;

    /// The path a module was loaded from.
    fn path_of_module(&self, module: &str) -> Option<PathBuf>;
}

/// Signature and location facts about one callable.
#[derive(Debug, Clone)]
pub struct DefineRecord {
    /// The target this record describes.
    pub target: Target,
    /// Formal parameters in declaration order.
    pub parameters: Vec<Formal>,
    /// Names of parameters that carry defaults.
    pub defaulted: FxHashSet<CompactString>,
    /// 1-indexed definition line.
    pub line: u32,
    /// Module the define lives in.
    pub module: CompactString,
    /// Decorator names, as written.
    pub decorators: Vec<CompactString>,
}

/// Facts about one class.
#[derive(Debug, Clone, Default)]
pub struct ClassRecord {
    /// Qualified class name.
    pub qualified: CompactString,
    /// Resolved qualified bases (unresolved bases kept as written).
    pub bases: Vec<CompactString>,
    /// Method names defined directly on the class.
    pub methods: Vec<CompactString>,
    /// Attributes: annotated class-body names then `self.x` targets from
    /// `__init__`, in declaration order.
    pub attributes: Vec<CompactString>,
    /// Decorator names, as written.
    pub decorators: Vec<CompactString>,
}

/// Symbol index over the parsed modules.
#[derive(Debug, Default)]
pub struct AstResolver {
    defines: FxHashMap<CompactString, DefineRecord>,
    classes: FxHashMap<CompactString, ClassRecord>,
    subclasses: FxHashMap<CompactString, Vec<CompactString>>,
    imports: FxHashMap<CompactString, FxHashMap<CompactString, CompactString>>,
    module_defines: FxHashMap<CompactString, Vec<Target>>,
    module_paths: FxHashMap<CompactString, PathBuf>,
    modules: FxHashSet<CompactString>,
}

impl AstResolver {
    /// Indexes a set of parsed modules.
    #[must_use]
    pub fn build(modules: &[ParsedModule]) -> Self {
        let mut resolver = Self::default();
        for parsed in modules {
            resolver.index_module(parsed);
        }
        resolver.link_subclasses();
        resolver
    }

    /// The record for a callable, if it is known.
    #[must_use]
    pub fn define_record(&self, target: &Target) -> Option<&DefineRecord> {
        match target {
            Target::Override { class, name } => self
                .defines
                .get(CompactString::from(format!("{class}.{name}")).as_str()),
            _ => self.defines.get(target.canonical().as_str()),
        }
    }

    /// The record for a class, if it is known.
    #[must_use]
    pub fn class_record(&self, class: &str) -> Option<&ClassRecord> {
        self.classes.get(class)
    }

    /// All known classes, in deterministic order.
    #[must_use]
    pub fn all_classes(&self) -> Vec<&ClassRecord> {
        let mut classes: Vec<&ClassRecord> = self.classes.values().collect();
        classes.sort_by(|a, b| a.qualified.cmp(&b.qualified));
        classes
    }

    /// All known defines, in deterministic order.
    #[must_use]
    pub fn all_defines(&self) -> Vec<&DefineRecord> {
        let mut defines: Vec<&DefineRecord> = self.defines.values().collect();
        defines.sort_by(|a, b| a.target.cmp(&b.target));
        defines
    }

    /// The nearest class in the hierarchy, starting at `class` itself,
    /// that defines `method`.
    #[must_use]
    pub fn method_defining_class(&self, class: &str, method: &str) -> Option<CompactString> {
        let record = self.classes.get(class)?;
        if record.methods.iter().any(|name| name == method) {
            return Some(record.qualified.clone());
        }
        for base in &record.bases {
            if let Some(found) = self.method_defining_class(base, method) {
                return Some(found);
            }
        }
        None
    }

    fn index_module(&mut self, parsed: &ParsedModule) {
        let module = CompactString::from(parsed.name.as_str());
        self.modules.insert(module.clone());
        self.module_paths
            .insert(module.clone(), parsed.path.clone());
        self.imports.entry(module.clone()).or_default();

        for stmt in &parsed.module.body {
            match stmt {
                Stmt::Import(import) => {
                    let imports = self.imports.entry(module.clone()).or_default();
                    for alias in &import.names {
                        match &alias.asname {
                            Some(asname) => {
                                imports.insert(
                                    CompactString::from(asname.as_str()),
                                    CompactString::from(alias.name.as_str()),
                                );
                            }
                            None => {
                                // `import a.b` binds `a`; deeper segments
                                // resolve through the dotted lookup.
                                let head = alias.name.split('.').next().unwrap_or_default();
                                imports.insert(
                                    CompactString::from(head),
                                    CompactString::from(head),
                                );
                            }
                        }
                    }
                }
                Stmt::ImportFrom(import) => {
                    let Some(from) = &import.module else { continue };
                    let imports = self.imports.entry(module.clone()).or_default();
                    for alias in &import.names {
                        let binding = alias
                            .asname
                            .as_ref()
                            .map_or(alias.name.as_str(), ruff_python_ast::Identifier::as_str);
                        imports.insert(
                            CompactString::from(binding),
                            CompactString::from(format!("{from}.{}", alias.name.as_str())),
                        );
                    }
                }
                Stmt::FunctionDef(func) => {
                    self.index_function(&module, func, None, &parsed.line_index);
                }
                Stmt::ClassDef(class) => {
                    self.index_class(&module, class, &parsed.line_index);
                }
                _ => {}
            }
        }
    }

    fn index_function(
        &mut self,
        module: &CompactString,
        func: &ast::StmtFunctionDef,
        class: Option<&CompactString>,
        line_index: &LineIndex,
    ) {
        let target = match class {
            Some(class) => Target::method(class.clone(), func.name.as_str()),
            None => Target::function(format!("{module}.{}", func.name)),
        };
        let normalized = normalize_parameters(&func.parameters);
        let parameters = normalized
            .iter()
            .map(|param| Formal {
                root: param.root.clone(),
                name: param.name.clone(),
            })
            .collect();
        let defaulted = normalized
            .iter()
            .filter(|param| param.has_default)
            .map(|param| param.name.clone())
            .collect();
        let record = DefineRecord {
            target: target.clone(),
            parameters,
            defaulted,
            line: line_index.line_index(func.range().start()) as u32,
            module: module.clone(),
            decorators: func
                .decorator_list
                .iter()
                .filter_map(|decorator| dotted_name(&decorator.expression))
                .collect(),
        };
        self.defines
            .insert(CompactString::from(target.canonical()), record);
        self.module_defines
            .entry(module.clone())
            .or_default()
            .push(target);
    }

    fn index_class(
        &mut self,
        module: &CompactString,
        class: &ast::StmtClassDef,
        line_index: &LineIndex,
    ) {
        let qualified = CompactString::from(format!("{module}.{}", class.name));
        let mut record = ClassRecord {
            qualified: qualified.clone(),
            decorators: class
                .decorator_list
                .iter()
                .filter_map(|decorator| dotted_name(&decorator.expression))
                .collect(),
            ..ClassRecord::default()
        };

        for base in class.bases() {
            if let Some(name) = dotted_name(base) {
                record.bases.push(name);
            }
        }

        for stmt in &class.body {
            match stmt {
                Stmt::FunctionDef(func) => {
                    record.methods.push(CompactString::from(func.name.as_str()));
                    if func.name.as_str() == "__init__" {
                        collect_self_attributes(&func.body, &mut record.attributes);
                    }
                    self.index_function(module, func, Some(&qualified), line_index);
                }
                Stmt::AnnAssign(assign) => {
                    if let Expr::Name(name) = &*assign.target {
                        record.attributes.push(CompactString::from(name.id.as_str()));
                    }
                }
                _ => {}
            }
        }

        self.classes.insert(qualified, record);
    }

    /// Rewrites bases to qualified names where possible and inverts the
    /// base relation into a subclass table.
    fn link_subclasses(&mut self) {
        let class_names: Vec<CompactString> = self.classes.keys().cloned().collect();
        let mut resolved_bases: FxHashMap<CompactString, Vec<CompactString>> =
            FxHashMap::default();

        for name in &class_names {
            let module = name.rsplit_once('.').map_or("", |(module, _)| module);
            let bases = self.classes[name].bases.clone();
            let qualified: Vec<CompactString> = bases
                .iter()
                .map(|base| {
                    self.resolve_class(module, base)
                        .unwrap_or_else(|| base.clone())
                })
                .collect();
            resolved_bases.insert(name.clone(), qualified);
        }

        for (name, bases) in resolved_bases {
            for base in &bases {
                self.subclasses
                    .entry(base.clone())
                    .or_default()
                    .push(name.clone());
            }
            if let Some(record) = self.classes.get_mut(&name) {
                record.bases = bases;
            }
        }
        for subs in self.subclasses.values_mut() {
            subs.sort();
        }
    }

    fn lookup_import(&self, module: &str, name: &str) -> Option<&CompactString> {
        self.imports.get(module)?.get(name)
    }
}

/// Renders a dotted attribute/name expression as text.
#[must_use]
pub fn dotted_name(expr: &Expr) -> Option<CompactString> {
    match expr {
        Expr::Name(name) => Some(CompactString::from(name.id.as_str())),
        Expr::Attribute(attr) => {
            let base = dotted_name(&attr.value)?;
            Some(CompactString::from(format!("{base}.{}", attr.attr)))
        }
        // `Generic[T]` and friends: resolve the subscripted value.
        Expr::Subscript(subscript) => dotted_name(&subscript.value),
        _ => None,
    }
}

impl Resolver for AstResolver {
    fn resolve_callable(&self, module: &str, name: &str) -> Option<Target> {
        // Module-local define.
        let local = format!("{module}.{name}");
        if let Some(record) = self.defines.get(local.as_str()) {
            return Some(record.target.clone());
        }
        // Constructor call of a module-local or imported class. The
        // `__init__` target stands for the construction even when the
        // class does not define one (its model may be inferred).
        if let Some(class) = self.resolve_class(module, name) {
            return Some(Target::method(class, "__init__"));
        }
        // Dotted path through an import alias: `mod.func(...)`.
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(qualified) = self.lookup_import(module, head) {
                let candidate = format!("{qualified}.{rest}");
                if let Some(record) = self.defines.get(candidate.as_str()) {
                    return Some(record.target.clone());
                }
                if self.modules.contains(qualified.as_str()) {
                    return self.resolve_callable(qualified, rest);
                }
            }
            // Method on a module-local class: `Class.method`.
            if let Some(class) = self.resolve_class(module, head) {
                if let Some(defining) = self.method_defining_class(&class, rest) {
                    return Some(Target::method(defining, rest));
                }
            }
            return None;
        }
        // Direct import of a callable: `from m import f`.
        if let Some(qualified) = self.lookup_import(module, name) {
            if let Some(record) = self.defines.get(qualified.as_str()) {
                return Some(record.target.clone());
            }
        }
        None
    }

    fn resolve_class(&self, module: &str, name: &str) -> Option<CompactString> {
        let local = CompactString::from(format!("{module}.{name}"));
        if self.classes.contains_key(&local) {
            return Some(local);
        }
        if let Some(qualified) = self.lookup_import(module, name) {
            if self.classes.contains_key(qualified) {
                return Some(qualified.clone());
            }
        }
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(qualified) = self.lookup_import(module, head) {
                let candidate = CompactString::from(format!("{qualified}.{rest}"));
                if self.classes.contains_key(&candidate) {
                    return Some(candidate);
                }
            }
        }
        // Already-qualified names pass through.
        if self.classes.contains_key(name) {
            return Some(CompactString::from(name));
        }
        None
    }

    fn defines(&self, module: &str) -> Vec<Target> {
        self.module_defines.get(module).cloned().unwrap_or_default()
    }

    fn attributes(&self, class: &str) -> Vec<CompactString> {
        self.classes
            .get(class)
            .map(|record| record.attributes.clone())
            .unwrap_or_default()
    }

    fn parameters(&self, target: &Target) -> Option<Vec<Formal>> {
        self.define_record(target)
            .map(|record| record.parameters.clone())
    }

    fn is_subclass(&self, sub: &str, sup: &str) -> bool {
        if sub == sup {
            return true;
        }
        let Some(record) = self.classes.get(sub) else {
            return false;
        };
        record.bases.iter().any(|base| self.is_subclass(base, sup))
    }

    fn superclasses(&self, class: &str) -> Vec<CompactString> {
        let mut result = Vec::new();
        let mut queue = vec![CompactString::from(class)];
        while let Some(current) = queue.pop() {
            let Some(record) = self.classes.get(&current) else {
                continue;
            };
            for base in &record.bases {
                if !result.contains(base) {
                    result.push(base.clone());
                    queue.push(base.clone());
                }
            }
        }
        result
    }

    fn overrides(&self, class: &str, method: &str) -> Vec<Target> {
        let mut result = Vec::new();
        let mut queue: Vec<CompactString> = self
            .subclasses
            .get(class)
            .cloned()
            .unwrap_or_default();
        let mut seen = FxHashSet::default();
        while let Some(current) = queue.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(record) = self.classes.get(&current) {
                if record.methods.iter().any(|name| name == method) {
                    result.push(Target::method(current.clone(), method));
                }
            }
            queue.extend(self.subclasses.get(&current).cloned().unwrap_or_default());
        }
        result.sort();
        result
    }

    fn path_of_module(&self, module: &str) -> Option<PathBuf> {
        self.module_paths.get(module).cloned()
    }
}

/// Collects `self.x = ...` targets from an `__init__` body, keeping
/// declaration order and skipping duplicates.
fn collect_self_attributes(body: &[Stmt], attributes: &mut Vec<CompactString>) {
    for stmt in body {
        if let Stmt::Assign(assign) = stmt {
            for target in &assign.targets {
                if let Expr::Attribute(attr) = target {
                    if let Expr::Name(receiver) = &*attr.value {
                        if receiver.id.as_str() == "self" {
                            let name = CompactString::from(attr.attr.as_str());
                            if !attributes.contains(&name) {
                                attributes.push(name);
                            }
                        }
                    }
                }
            }
        }
    }
}
