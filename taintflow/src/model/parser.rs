//! The model-language parser.
//!
//! Model files (`.tfmodel`) reuse the target language's syntax: a model is
//! a zero-body function signature whose annotations carry taint, a class
//! with taint in its bases (whole-class annotation), or an annotated
//! global assignment. Parsing is two-pass: syntactic (this module, over
//! the real Python parser) and semantic (signature verification in
//! [`super::verify`]).
//!
//! Dotted declaration names (`def pkg.mod.func(...)`) are not valid
//! Python; they are mangled to plain identifiers before parsing and
//! restored afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use compact_str::CompactString;
use ruff_python_ast::{self as ast, Expr, Stmt};
use ruff_text_size::Ranged;

use crate::access_path::{normalize_parameters, AccessPath, PathLabel, Root};
use crate::config::TaintConfig;
use crate::errors::{AnalysisError, ModelError};
use crate::model::{Mode, Model, SanitizeAxes};
use crate::resolver::AstResolver;
use crate::taint::{FlowDetails, SimpleFeature, SinkKind, SourceKind};
use crate::target::Target;
use crate::utils::LineIndex;

use super::verify;

/// Marker substituted for dots in declaration names before parsing.
const DOT_MARKER: &str = "__DOT__";

/// A single parsed taint annotation, possibly path-qualified.
#[derive(Debug, Clone)]
pub struct ParsedAnnotation {
    /// Path prefix accumulated from `AppliesTo` qualifiers.
    pub path: AccessPath,
    /// What the annotation declares.
    pub kind: AnnotationKind,
}

/// The declarative content of one annotation.
#[derive(Debug, Clone)]
pub enum AnnotationKind {
    /// `TaintSource[K]`.
    Source {
        /// The declared source kind.
        kind: SourceKind,
        /// Feature modifiers.
        features: Vec<SimpleFeature>,
    },
    /// `TaintSink[K]` or `PartialSink[K]`.
    Sink {
        /// The declared sink kind.
        kind: SinkKind,
        /// Feature modifiers.
        features: Vec<SimpleFeature>,
    },
    /// `TaintInTaintOut[...]`.
    Tito {
        /// `LocalReturn` or `ParameterUpdate`.
        kind: SinkKind,
        /// Feature modifiers (including transform markers).
        features: Vec<SimpleFeature>,
    },
    /// `AddFeatureToArgument[...]`.
    AddFeature {
        /// The features to attach.
        features: Vec<SimpleFeature>,
    },
    /// `Sanitize` / `Sanitize[...]`.
    Sanitize(SanitizeAxes),
    /// `SkipAnalysis`.
    SkipAnalysis,
}

/// Parses user model files into per-target models.
pub struct ModelParser<'a> {
    config: &'a TaintConfig,
    resolver: &'a AstResolver,
    verify: bool,
    /// Validation errors accumulated under `verify = false`.
    pub errors: Vec<ModelError>,
}

impl<'a> ModelParser<'a> {
    /// Creates a parser. With `verify` set, the first invalid model
    /// aborts; otherwise invalid models are logged and dropped.
    #[must_use]
    pub fn new(config: &'a TaintConfig, resolver: &'a AstResolver, verify: bool) -> Self {
        Self {
            config,
            resolver,
            verify,
            errors: Vec::new(),
        }
    }

    /// Parses a set of model files. Models for the same target join.
    pub fn parse_files(
        &mut self,
        paths: &[std::path::PathBuf],
    ) -> Result<BTreeMap<Target, Model>, AnalysisError> {
        let mut models = BTreeMap::new();
        for path in paths {
            let source = fs::read_to_string(path).map_err(|source| AnalysisError::SourceIo {
                path: path.clone(),
                source,
            })?;
            self.parse_source(path, &source, &mut models)?;
        }
        Ok(models)
    }

    /// Parses one model file into `models`.
    pub fn parse_source(
        &mut self,
        path: &Path,
        source: &str,
        models: &mut BTreeMap<Target, Model>,
    ) -> Result<(), AnalysisError> {
        let mangled = mangle_dotted_declarations(source);
        let line_index = LineIndex::new(source);
        let parsed = match ruff_python_parser::parse_module(&mangled) {
            Ok(parsed) => parsed,
            Err(error) => {
                return self.report(
                    models,
                    ModelError {
                        path: path.to_path_buf(),
                        line: 1,
                        message: format!("syntax error in model file: {error}"),
                    },
                    None,
                );
            }
        };
        let module = parsed.into_syntax();

        for stmt in &module.body {
            match stmt {
                Stmt::FunctionDef(func) => {
                    self.parse_define_model(func, path, &line_index, models)?;
                }
                Stmt::ClassDef(class) => {
                    self.parse_class_model(class, path, &line_index, models)?;
                }
                Stmt::AnnAssign(assign) => {
                    self.parse_global_model(assign, path, &line_index, models)?;
                }
                _ => {
                    let error = ModelError {
                        path: path.to_path_buf(),
                        line: line_index.line_index(stmt.range().start()),
                        message: "unexpected statement in model file".to_owned(),
                    };
                    self.report(models, error, None)?;
                }
            }
        }
        Ok(())
    }

    /// Records an error: fatal under `verify`, logged otherwise.
    fn report(
        &mut self,
        _models: &mut BTreeMap<Target, Model>,
        error: ModelError,
        dropped: Option<&Target>,
    ) -> Result<(), AnalysisError> {
        if self.verify {
            return Err(AnalysisError::ModelVerification(error));
        }
        match dropped {
            Some(callable) => tracing::warn!(callable = %callable, "dropping invalid model: {error}"),
            None => tracing::warn!("dropping invalid model: {error}"),
        }
        self.errors.push(error);
        Ok(())
    }

    fn parse_define_model(
        &mut self,
        func: &ast::StmtFunctionDef,
        path: &Path,
        line_index: &LineIndex,
        models: &mut BTreeMap<Target, Model>,
    ) -> Result<(), AnalysisError> {
        let line = line_index.line_index(func.range().start());
        let name = demangle(func.name.as_str());

        if let Some(message) = check_stub_body(&func.body) {
            let error = ModelError {
                path: path.to_path_buf(),
                line,
                message: format!("model for `{name}`: {message}"),
            };
            return self.report(models, error, None);
        }

        let declared = normalize_parameters(&func.parameters);
        let resolved = match verify::resolve_and_verify(&name, &declared, self.resolver) {
            Ok(resolved) => resolved,
            Err(message) => {
                let error = ModelError {
                    path: path.to_path_buf(),
                    line,
                    message,
                };
                return self.report(models, error, None);
            }
        };

        let mut model = Model::empty();
        let mut failed = None;

        for (index, root) in &resolved.bindings {
            let Some(annotation) = declared[*index].annotation else {
                continue;
            };
            match self.parse_annotation(annotation) {
                Ok(annotations) => {
                    for parsed in annotations {
                        apply_to_parameter(&mut model, root.clone(), &parsed);
                    }
                }
                Err(message) => {
                    failed = Some(message);
                    break;
                }
            }
        }

        if failed.is_none() {
            if let Some(returns) = &func.returns {
                match self.parse_annotation(returns) {
                    Ok(annotations) => {
                        for parsed in annotations {
                            apply_to_return(&mut model, &parsed);
                        }
                    }
                    Err(message) => failed = Some(message),
                }
            }
        }

        if let Some(message) = failed {
            let error = ModelError {
                path: path.to_path_buf(),
                line,
                message: format!("model for `{name}`: {message}"),
            };
            return self.report(models, error, Some(&resolved.target));
        }

        join_model(models, resolved.target, model);
        Ok(())
    }

    fn parse_class_model(
        &mut self,
        class: &ast::StmtClassDef,
        path: &Path,
        line_index: &LineIndex,
        models: &mut BTreeMap<Target, Model>,
    ) -> Result<(), AnalysisError> {
        let line = line_index.line_index(class.range().start());
        let name = demangle(class.name.as_str());

        let Some(record) = self.resolver.class_record(&name).cloned() else {
            let error = ModelError {
                path: path.to_path_buf(),
                line,
                message: format!("class `{name}` is not part of the analyzed sources"),
            };
            return self.report(models, error, None);
        };

        // The class's bases carry the annotation, applied to every
        // parameter of every method.
        for base in class.bases() {
            let annotations = match self.parse_annotation(base) {
                Ok(annotations) => annotations,
                Err(message) => {
                    let error = ModelError {
                        path: path.to_path_buf(),
                        line,
                        message: format!("class model `{name}`: {message}"),
                    };
                    return self.report(models, error, None);
                }
            };
            for method in &record.methods {
                let target = Target::method(record.qualified.clone(), method.clone());
                let Some(formals) = self.resolver.define_record(&target) else {
                    continue;
                };
                let mut model = Model::empty();
                for formal in &formals.parameters {
                    if formal.name.as_str() == "self" || formal.name.as_str() == "cls" {
                        continue;
                    }
                    for parsed in &annotations {
                        apply_to_parameter(&mut model, formal.root.clone(), parsed);
                    }
                }
                join_model(models, target, model);
            }
        }
        Ok(())
    }

    fn parse_global_model(
        &mut self,
        assign: &ast::StmtAnnAssign,
        path: &Path,
        line_index: &LineIndex,
        models: &mut BTreeMap<Target, Model>,
    ) -> Result<(), AnalysisError> {
        let line = line_index.line_index(assign.range().start());
        let Some(name) = crate::resolver::dotted_name(&assign.target) else {
            let error = ModelError {
                path: path.to_path_buf(),
                line,
                message: "global model target must be a dotted name".to_owned(),
            };
            return self.report(models, error, None);
        };

        let annotations = match self.parse_annotation(&assign.annotation) {
            Ok(annotations) => annotations,
            Err(message) => {
                let error = ModelError {
                    path: path.to_path_buf(),
                    line,
                    message: format!("global model `{name}`: {message}"),
                };
                return self.report(models, error, None);
            }
        };

        let target = Target::Object(name);
        let mut model = Model::empty();
        for parsed in &annotations {
            // A tainted global is a source when read and a sink when
            // written; both attach to the object's result port.
            apply_to_return(&mut model, parsed);
            if let AnnotationKind::Sink { kind, features } = &parsed.kind {
                let mut flow = FlowDetails::declaration();
                for feature in features {
                    flow.add_feature(feature.clone());
                }
                model.add_sink(Root::LocalResult, &parsed.path, kind.clone(), flow);
            }
        }
        join_model(models, target, model);
        Ok(())
    }

    /// Parses one annotation expression into its declarative parts.
    pub fn parse_annotation(&self, expr: &Expr) -> Result<Vec<ParsedAnnotation>, String> {
        match expr {
            Expr::Name(name) => match name.id.as_str() {
                "SkipAnalysis" => Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::SkipAnalysis,
                }]),
                "Sanitize" => Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::Sanitize(SanitizeAxes::all()),
                }]),
                "TaintInTaintOut" => Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::Tito {
                        kind: SinkKind::LocalReturn,
                        features: Vec::new(),
                    },
                }]),
                other => Err(format!("unknown annotation `{other}`")),
            },
            Expr::Subscript(subscript) => self.parse_subscript(subscript),
            _ => Err("annotation must be a name or subscript".to_owned()),
        }
    }

    fn parse_subscript(&self, subscript: &ast::ExprSubscript) -> Result<Vec<ParsedAnnotation>, String> {
        let Expr::Name(head) = &*subscript.value else {
            return Err("annotation head must be a plain name".to_owned());
        };
        let elements = slice_elements(&subscript.slice);

        match head.id.as_str() {
            "TaintSource" => {
                let (kinds, features) = self.parse_kind_list(&elements)?;
                kinds
                    .into_iter()
                    .map(|kind| {
                        if !self.config.is_declared_source(&kind) {
                            return Err(format!("undefined source kind `{kind}`"));
                        }
                        Ok(ParsedAnnotation {
                            path: AccessPath::new(),
                            kind: AnnotationKind::Source {
                                kind: SourceKind::new(kind),
                                features: features.clone(),
                            },
                        })
                    })
                    .collect()
            }
            "TaintSink" => {
                let (kinds, features) = self.parse_kind_list(&elements)?;
                kinds
                    .into_iter()
                    .map(|kind| {
                        if !self.config.is_declared_sink(&kind) {
                            return Err(format!("undefined sink kind `{kind}`"));
                        }
                        Ok(ParsedAnnotation {
                            path: AccessPath::new(),
                            kind: AnnotationKind::Sink {
                                kind: SinkKind::Named(kind),
                                features: features.clone(),
                            },
                        })
                    })
                    .collect()
            }
            "PartialSink" => {
                let (kinds, features) = self.parse_kind_list(&elements)?;
                kinds
                    .into_iter()
                    .map(|kind| {
                        let sink = self
                            .config
                            .resolve_partial_sink(&kind)
                            .ok_or_else(|| format!("undefined partial sink `{kind}`"))?;
                        Ok(ParsedAnnotation {
                            path: AccessPath::new(),
                            kind: AnnotationKind::Sink {
                                kind: sink,
                                features: features.clone(),
                            },
                        })
                    })
                    .collect()
            }
            "TaintInTaintOut" => {
                let mut features = Vec::new();
                let mut kind = SinkKind::LocalReturn;
                for element in &elements {
                    if let Some(feature) = self.parse_feature_modifier(element)? {
                        features.push(feature);
                        continue;
                    }
                    match element {
                        Expr::Name(name) if name.id.as_str() == "LocalReturn" => {}
                        Expr::Subscript(inner) => {
                            let Expr::Name(inner_head) = &*inner.value else {
                                return Err("unsupported taint-in-taint-out modifier".to_owned());
                            };
                            match inner_head.id.as_str() {
                                "Updates" => {
                                    let position = integer_literal(&inner.slice).ok_or_else(
                                        || "Updates[...] requires a parameter index".to_owned(),
                                    )?;
                                    kind = SinkKind::ParameterUpdate(position);
                                }
                                "Transform" => {
                                    let name = name_literal(&inner.slice).ok_or_else(|| {
                                        "Transform[...] requires a transform name".to_owned()
                                    })?;
                                    if !self.config.transforms.contains(name.as_str()) {
                                        return Err(format!("undefined transform `{name}`"));
                                    }
                                    features.push(SimpleFeature::Transform(name));
                                }
                                other => {
                                    return Err(format!(
                                        "unsupported taint-in-taint-out modifier `{other}`"
                                    ))
                                }
                            }
                        }
                        _ => return Err("unsupported taint-in-taint-out modifier".to_owned()),
                    }
                }
                Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::Tito { kind, features },
                }])
            }
            "AddFeatureToArgument" => {
                let mut features = Vec::new();
                for element in &elements {
                    match self.parse_feature_modifier(element)? {
                        Some(feature) => features.push(feature),
                        None => return Err("AddFeatureToArgument requires Via[...]".to_owned()),
                    }
                }
                Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::AddFeature { features },
                }])
            }
            "Sanitize" => {
                let mut axes = SanitizeAxes::default();
                for element in &elements {
                    let Expr::Name(name) = element else {
                        return Err("Sanitize[...] takes axis names".to_owned());
                    };
                    match name.id.as_str() {
                        "TaintSource" => axes.sources = true,
                        "TaintSink" => axes.sinks = true,
                        "TaintInTaintOut" => axes.tito = true,
                        other => return Err(format!("unknown sanitize axis `{other}`")),
                    }
                }
                Ok(vec![ParsedAnnotation {
                    path: AccessPath::new(),
                    kind: AnnotationKind::Sanitize(axes),
                }])
            }
            "AppliesTo" => {
                let [selector, inner] = elements.as_slice() else {
                    return Err("AppliesTo[selector, annotation] takes two arguments".to_owned());
                };
                let label = if let Some(index) = integer_literal(selector) {
                    PathLabel::Index(index)
                } else if let Some(name) = string_literal(selector) {
                    PathLabel::Field(name)
                } else {
                    return Err("AppliesTo selector must be an index or a string".to_owned());
                };
                let mut annotations = self.parse_annotation(inner)?;
                for annotation in &mut annotations {
                    annotation.path.insert(0, label.clone());
                }
                Ok(annotations)
            }
            "Union" => {
                let mut annotations = Vec::new();
                for element in &elements {
                    annotations.extend(self.parse_annotation(element)?);
                }
                Ok(annotations)
            }
            other => Err(format!("unknown annotation `{other}`")),
        }
    }

    /// Splits a kind list into kind names and feature modifiers.
    fn parse_kind_list(
        &self,
        elements: &[&Expr],
    ) -> Result<(Vec<CompactString>, Vec<SimpleFeature>), String> {
        let mut kinds = Vec::new();
        let mut features = Vec::new();
        for element in elements {
            if let Some(feature) = self.parse_feature_modifier(element)? {
                features.push(feature);
                continue;
            }
            match element {
                Expr::Name(name) => kinds.push(CompactString::from(name.id.as_str())),
                _ => return Err("kind list entries must be names or Via[...]".to_owned()),
            }
        }
        if kinds.is_empty() {
            return Err("at least one kind is required".to_owned());
        }
        Ok((kinds, features))
    }

    /// Parses `Via[feature]` / `ViaValueOf[param]` modifiers.
    fn parse_feature_modifier(&self, expr: &Expr) -> Result<Option<SimpleFeature>, String> {
        let Expr::Subscript(subscript) = expr else {
            return Ok(None);
        };
        let Expr::Name(head) = &*subscript.value else {
            return Ok(None);
        };
        match head.id.as_str() {
            "Via" => {
                let name = name_literal(&subscript.slice)
                    .ok_or_else(|| "Via[...] requires a feature name".to_owned())?;
                if !self.config.features.contains(name.as_str()) {
                    return Err(format!("undefined feature `{name}`"));
                }
                Ok(Some(SimpleFeature::Via(name)))
            }
            "ViaValueOf" => {
                let name = name_literal(&subscript.slice)
                    .ok_or_else(|| "ViaValueOf[...] requires a parameter name".to_owned())?;
                Ok(Some(SimpleFeature::ViaValue {
                    feature: CompactString::from("via-value"),
                    argument: name,
                }))
            }
            _ => Ok(None),
        }
    }
}

/// Applies one parsed annotation to a parameter port.
fn apply_to_parameter(model: &mut Model, root: Root, parsed: &ParsedAnnotation) {
    match &parsed.kind {
        AnnotationKind::Source { kind, features } => {
            let mut flow = FlowDetails::declaration();
            for feature in features {
                flow.add_feature(feature.clone());
            }
            model.add_source(root, &parsed.path, kind.clone(), flow);
        }
        AnnotationKind::Sink { kind, features } => {
            let mut flow = FlowDetails::declaration();
            for feature in features {
                flow.add_feature(feature.clone());
            }
            model.add_sink(root, &parsed.path, kind.clone(), flow);
        }
        AnnotationKind::Tito { kind, features } => {
            let mut flow = FlowDetails::declaration();
            for feature in features {
                flow.add_feature(feature.clone());
            }
            model.add_tito(root, &parsed.path, kind.clone(), AccessPath::new(), flow);
        }
        AnnotationKind::AddFeature { features } => {
            let slot = model.attach_features.entry(root).or_default();
            for feature in features {
                if !slot.contains(feature) {
                    slot.push(feature.clone());
                }
            }
        }
        AnnotationKind::Sanitize(axes) => {
            model.port_sanitizers.entry(root).or_default().merge(*axes);
        }
        AnnotationKind::SkipAnalysis => {
            model.mode.merge(Mode::SkipAnalysis);
        }
    }
}

/// Applies one parsed annotation to the return port.
fn apply_to_return(model: &mut Model, parsed: &ParsedAnnotation) {
    match &parsed.kind {
        AnnotationKind::Source { kind, features } => {
            let mut flow = FlowDetails::declaration();
            for feature in features {
                flow.add_feature(feature.clone());
            }
            model.add_source(Root::LocalResult, &parsed.path, kind.clone(), flow);
        }
        AnnotationKind::Sanitize(axes) => {
            model.mode.merge(Mode::Sanitize(*axes));
        }
        AnnotationKind::SkipAnalysis => {
            model.mode.merge(Mode::SkipAnalysis);
        }
        // Sinks and tito make no sense on a return port; ignore quietly
        // to stay permissive with hand-written stubs.
        _ => {}
    }
}

fn join_model(models: &mut BTreeMap<Target, Model>, target: Target, model: Model) {
    match models.get_mut(&target) {
        Some(existing) => existing.join(&model),
        None => {
            models.insert(target, model);
        }
    }
}

/// Accepts `...`, `pass`, or a lone docstring as a model body.
fn check_stub_body(body: &[Stmt]) -> Option<String> {
    let is_stub = body.iter().all(|stmt| match stmt {
        Stmt::Pass(_) => true,
        Stmt::Expr(expr) => matches!(
            &*expr.value,
            Expr::EllipsisLiteral(_) | Expr::StringLiteral(_)
        ),
        _ => false,
    });
    if is_stub {
        None
    } else {
        Some("model body must be `...`".to_owned())
    }
}

/// The elements of a subscript slice: a tuple's items or the single
/// expression itself.
fn slice_elements(slice: &Expr) -> Vec<&Expr> {
    match slice {
        Expr::Tuple(tuple) => tuple.elts.iter().collect(),
        other => vec![other],
    }
}

fn integer_literal(expr: &Expr) -> Option<u32> {
    if let Expr::NumberLiteral(number) = expr {
        if let ast::Number::Int(int) = &number.value {
            return int.to_string().parse().ok();
        }
    }
    None
}

fn string_literal(expr: &Expr) -> Option<CompactString> {
    if let Expr::StringLiteral(literal) = expr {
        return Some(CompactString::from(literal.value.to_str()));
    }
    None
}

/// A bare name or quoted string, as used for feature and parameter
/// references inside modifiers.
fn name_literal(expr: &Expr) -> Option<CompactString> {
    match expr {
        Expr::Name(name) => Some(CompactString::from(name.id.as_str())),
        _ => string_literal(expr),
    }
}

/// Rewrites dotted declaration names into parseable identifiers.
fn mangle_dotted_declarations(source: &str) -> String {
    let mut result = String::with_capacity(source.len());
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let keyword = if trimmed.starts_with("def ") {
            Some("def ")
        } else if trimmed.starts_with("class ") {
            Some("class ")
        } else {
            None
        };
        let Some(keyword) = keyword else {
            result.push_str(line);
            continue;
        };
        let indent_len = line.len() - trimmed.len();
        let after_keyword = &trimmed[keyword.len()..];
        let name_len = after_keyword
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '.'))
            .unwrap_or(after_keyword.len());
        let (name, rest) = after_keyword.split_at(name_len);
        result.push_str(&line[..indent_len]);
        result.push_str(keyword);
        result.push_str(&name.replace('.', DOT_MARKER));
        result.push_str(rest);
    }
    result
}

/// Restores a mangled declaration name.
fn demangle(name: &str) -> String {
    name.replace(DOT_MARKER, ".")
}
