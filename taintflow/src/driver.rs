//! End-to-end analysis driver.
//!
//! Walks the source tree, parses modules, builds the resolver and the
//! graphs, seeds models, runs the fixpoint and writes results. The
//! call-graph build completes before the first fixpoint iteration; the
//! override graph is read-only thereafter.

use std::fs;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use ignore::WalkBuilder;
use ruff_python_ast::{self as ast, Stmt};
use ruff_text_size::Ranged;

use crate::access_path::normalize_parameters;
use crate::analysis::Issue;
use crate::config::{Options, TaintConfig};
use crate::errors::{AnalysisError, ModelError};
use crate::fixpoint::{self, DefineEntry, FixpointOptions};
use crate::graph::{CallSites, DefineCallGraphBuilder, OverrideGraph};
use crate::model::{inference, ModelParser};
use crate::report;
use crate::resolver::{AstResolver, ParsedModule};
use crate::scheduler::{Scheduler, SchedulingPolicy};
use crate::store::SharedModelTable;
use crate::target::Target;
use crate::utils::LineIndex;

/// Model file extension.
const MODEL_EXTENSION: &str = "tfmodel";

/// What to analyze and where to put the results.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    /// Root of the analyzed sources.
    pub source_root: PathBuf,
    /// Model files or directories of them.
    pub model_paths: Vec<PathBuf>,
    /// JSON taint configuration.
    pub taint_config: Option<PathBuf>,
    /// Where to write issue JSON (stdout summary otherwise).
    pub output: Option<PathBuf>,
    /// Where to write model JSON.
    pub save_models_to: Option<PathBuf>,
    /// Worker count override.
    pub jobs: Option<usize>,
    /// Abort on the first invalid model.
    pub verify_models: bool,
    /// `obscure` enables synthetic sinks on modelless callees.
    pub find_missing_flows: Option<String>,
    /// Suppress progress output.
    pub quiet: bool,
}

/// The results handed back to the CLI.
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// All issues, deterministically ordered.
    pub issues: Vec<Issue>,
    /// Model validation errors tolerated under `verify = false`.
    pub model_errors: Vec<ModelError>,
    /// Epochs the fixpoint needed.
    pub epochs: usize,
    /// Number of analyzed callables.
    pub callables: usize,
}

/// Runs a whole analysis.
pub fn run_analysis(request: &AnalysisRequest) -> Result<AnalysisOutcome, AnalysisError> {
    let options = Options::load_from_path(&request.source_root);

    let config = match &request.taint_config {
        Some(path) => TaintConfig::from_path(path)?,
        None => TaintConfig::default(),
    };

    let verify = request.verify_models || options.taintflow.verify_models.unwrap_or(false);
    let find_missing_flows = request
        .find_missing_flows
        .as_deref()
        .is_some_and(|mode| mode.eq_ignore_ascii_case("obscure"));

    // Parse the source tree.
    let modules = parse_source_tree(
        &request.source_root,
        options.taintflow.exclude_folders.as_deref().unwrap_or(&[]),
    )?;
    tracing::info!(modules = modules.len(), "parsed source tree");
    let resolver = AstResolver::build(&modules);

    // Parse user models, then infer constructor models. User models win
    // by joining over the inferred ones.
    let mut parser = ModelParser::new(&config, &resolver, verify);
    let model_files = collect_model_files(&request.model_paths);
    let mut models = parser.parse_files(&model_files)?;
    for (target, model) in inference::infer_constructor_models(&resolver) {
        models
            .entry(target)
            .and_modify(|existing| existing.join(&model))
            .or_insert(model);
    }
    let model_errors = std::mem::take(&mut parser.errors);

    // Seed the shared table.
    let store = SharedModelTable::with_capacity(
        options
            .taintflow
            .model_table_capacity
            .unwrap_or(1 << 20),
    );
    for (target, model) in models {
        store.put(target, model)?;
    }

    // Hard barrier: graphs are complete before the fixpoint starts.
    let override_graph = OverrideGraph::build(
        &resolver,
        config.constraints.maximum_overrides_to_analyze,
        options.taintflow.skip_overrides.as_deref().unwrap_or(&[]),
    );

    let scheduler = Scheduler::new(request.jobs.or(options.taintflow.jobs))
        .map_err(AnalysisError::Scheduler)?;
    let defines = collect_defines(&modules, &resolver, &scheduler)?;
    tracing::info!(callables = defines.len(), "built call graphs");

    let result = fixpoint::run(
        &defines,
        &store,
        &config,
        &override_graph,
        &scheduler,
        FixpointOptions {
            find_missing_flows,
            quiet: request.quiet,
        },
    );
    let result = match result {
        Ok(result) => result,
        Err(error) => {
            // Keep whatever converged before the failure.
            if let Some(path) = &request.save_models_to {
                let _ = report::write_models(path, &store.snapshot());
            }
            return Err(error);
        }
    };
    tracing::info!(
        epochs = result.epochs,
        issues = result.issues.len(),
        "fixpoint converged"
    );

    if let Some(path) = &request.output {
        report::write_issues(path, &result.issues)?;
    }
    if let Some(path) = &request.save_models_to {
        report::write_models(path, &store.snapshot())?;
    }

    Ok(AnalysisOutcome {
        issues: result.issues,
        model_errors,
        epochs: result.epochs,
        callables: defines.len(),
    })
}

/// Walks the source root and parses every Python file.
fn parse_source_tree(
    root: &Path,
    exclude_folders: &[String],
) -> Result<Vec<ParsedModule>, AnalysisError> {
    let mut paths = Vec::new();
    let walker = WalkBuilder::new(root).build();
    for entry in walker.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
            continue;
        }
        if exclude_folders.iter().any(|folder| {
            path.components()
                .any(|component| component.as_os_str() == folder.as_str())
        }) {
            continue;
        }
        paths.push(path.to_path_buf());
    }
    paths.sort();

    let mut modules = Vec::new();
    for path in paths {
        let source = fs::read_to_string(&path).map_err(|source| AnalysisError::SourceIo {
            path: path.clone(),
            source,
        })?;
        match ruff_python_parser::parse_module(&source) {
            Ok(parsed) => {
                modules.push(ParsedModule {
                    name: module_name(root, &path),
                    line_index: LineIndex::new(&source),
                    module: parsed.into_syntax(),
                    path,
                });
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), "skipping unparsable module: {error}");
            }
        }
    }
    Ok(modules)
}

/// The dotted module name of a source path relative to the root.
fn module_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let mut name = String::new();
    for component in relative.components() {
        let part = component.as_os_str().to_string_lossy();
        let part = part.strip_suffix(".py").unwrap_or(&part);
        if part == "__init__" {
            continue;
        }
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(part);
    }
    name
}

/// Model files listed directly or found under listed directories.
fn collect_model_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkBuilder::new(path).build().flatten() {
                let candidate = entry.path();
                if candidate
                    .extension()
                    .is_some_and(|ext| ext == MODEL_EXTENSION)
                {
                    files.push(candidate.to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files
}

/// Collects every define with its call sites, built in parallel as an
/// ancillary scheduler pass.
fn collect_defines<'a>(
    modules: &'a [ParsedModule],
    resolver: &AstResolver,
    scheduler: &Scheduler,
) -> Result<Vec<DefineEntry<'a>>, AnalysisError> {
    struct RawDefine<'a> {
        target: Target,
        define: &'a ast::StmtFunctionDef,
        module: &'a ParsedModule,
        class: Option<CompactString>,
    }

    let mut raw = Vec::new();
    for module in modules {
        for stmt in &module.module.body {
            match stmt {
                Stmt::FunctionDef(func) => {
                    raw.push(RawDefine {
                        target: Target::function(format!("{}.{}", module.name, func.name)),
                        define: func,
                        module,
                        class: None,
                    });
                }
                Stmt::ClassDef(class) => {
                    let qualified = CompactString::from(format!("{}.{}", module.name, class.name));
                    for body_stmt in &class.body {
                        if let Stmt::FunctionDef(method) = body_stmt {
                            raw.push(RawDefine {
                                target: Target::method(qualified.clone(), method.name.as_str()),
                                define: method,
                                module,
                                class: Some(qualified.clone()),
                            });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    // Resolve call sites in parallel chunks.
    let indices: Vec<usize> = (0..raw.len()).collect();
    let policy = SchedulingPolicy::FixedChunkCount {
        count: 0,
        min_chunk_size: 8,
        preferred_chunks_per_worker: 4,
    };
    let mut built: Vec<(usize, CallSites)> = scheduler
        .map_reduce(
            &policy,
            Vec::new(),
            &indices,
            |mut accumulator: Vec<(usize, CallSites)>, chunk: &[usize]| {
                for &index in chunk {
                    let entry = &raw[index];
                    let builder = DefineCallGraphBuilder::new(
                        resolver,
                        &entry.module.name,
                        entry.class.clone(),
                    );
                    accumulator.push((index, builder.build(entry.define)));
                }
                accumulator
            },
            |mut left, mut right| {
                left.append(&mut right);
                left
            },
        )
        .map_err(AnalysisError::Scheduler)?;
    built.sort_by_key(|(index, _)| *index);

    let mut defines = Vec::new();
    for (raw_define, (_, call_sites)) in raw.iter().zip(built) {
        for untracked in &call_sites.untracked {
            tracing::info!(
                callable = %raw_define.target,
                callee = %untracked,
                "untracked callee"
            );
        }
        let formals = normalize_parameters(&raw_define.define.parameters)
            .iter()
            .map(|param| crate::access_path::Formal {
                root: param.root.clone(),
                name: param.name.clone(),
            })
            .collect();
        defines.push(DefineEntry {
            target: raw_define.target.clone(),
            define: raw_define.define,
            module: raw_define.module,
            call_sites,
            formals,
            line: raw_define
                .module
                .line_index
                .line_index(raw_define.define.range().start()) as u32,
        });
    }
    Ok(defines)
}
