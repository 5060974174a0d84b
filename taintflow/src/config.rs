//! Configuration loading.
//!
//! Two layers: the JSON taint configuration (kinds, rules, combined-source
//! rules, analysis constraints) and the optional TOML analyzer options
//! discovered by walking up from the analyzed root (`.taintflow.toml` or
//! `pyproject.toml` under `[tool.taintflow]`).

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use compact_str::CompactString;
use serde::Deserialize;

use crate::errors::ConfigError;
use crate::taint::{SinkKind, SourceKind};

/// Labels assigned to the halves of a combined-source rule, in order.
const COMBINED_LABELS: [&str; 4] = ["a", "b", "c", "d"];

// ---------------------------------------------------------------------------
// Raw JSON shapes. Unknown keys are tolerated everywhere (forward
// compatibility); unknown kinds referenced by rules are rejected after
// parsing.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct RawKind {
    name: CompactString,
}

#[derive(Debug, Clone, Deserialize)]
struct RawRule {
    code: u32,
    #[serde(default)]
    name: String,
    sources: Vec<CompactString>,
    sinks: Vec<CompactString>,
    #[serde(default)]
    transforms: Vec<CompactString>,
    message_format: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCombinedHalf {
    sources: Vec<CompactString>,
    partial_sink: CompactString,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCombinedRule {
    code: u32,
    #[serde(default)]
    name: String,
    message_format: String,
    rule: Vec<RawCombinedHalf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawImplicitSources {
    #[serde(default)]
    literal_strings: Vec<RawKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawImplicitSinks {
    #[serde(default)]
    literal_strings: Vec<RawKind>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConstraints {
    maximum_overrides_to_analyze: Option<usize>,
    maximum_tree_depth: Option<usize>,
    maximum_trace_length: Option<u32>,
    widening_threshold: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTaintConfig {
    #[serde(default)]
    sources: Vec<RawKind>,
    #[serde(default)]
    sinks: Vec<RawKind>,
    #[serde(default)]
    transforms: Vec<RawKind>,
    #[serde(default)]
    features: Vec<RawKind>,
    #[serde(default)]
    rules: Vec<RawRule>,
    #[serde(default)]
    combined_source_rules: Vec<RawCombinedRule>,
    #[serde(default)]
    implicit_sources: RawImplicitSources,
    #[serde(default)]
    implicit_sinks: RawImplicitSinks,
    #[serde(default)]
    analysis_model_constraints: RawConstraints,
}

// ---------------------------------------------------------------------------
// Resolved configuration.
// ---------------------------------------------------------------------------

/// One half of a combined-source rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedHalf {
    /// The partial sink this half matches.
    pub sink: SinkKind,
    /// The source kinds allowed to feed it.
    pub sources: Vec<SourceKind>,
}

/// A resolved source-to-sink rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Stable rule code, unique across plain and combined rules.
    pub code: u32,
    /// Human-readable name.
    pub name: String,
    /// Template for the issue message.
    pub message_format: String,
    /// Allowed source kinds.
    pub sources: Vec<SourceKind>,
    /// Allowed sink kinds (partial sinks for combined rules).
    pub sinks: Vec<SinkKind>,
    /// Transforms the flow must have passed through, all of them.
    pub transforms: Vec<CompactString>,
    /// The per-half requirements of a combined-source rule.
    pub combined: Option<Vec<CombinedHalf>>,
}

/// Bounds that keep the analysis finite; kept in configuration rather
/// than embedded at use sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConstraints {
    /// Overrides beyond this bound collapse into an obscure placeholder.
    pub maximum_overrides_to_analyze: usize,
    /// Taint trees deeper than this are widened upward.
    pub maximum_tree_depth: usize,
    /// Call-site traces are capped at this many hops.
    pub maximum_trace_length: u32,
    /// Re-analyses of one callable within an epoch before widening kicks in.
    pub widening_threshold: u32,
}

impl Default for AnalysisConstraints {
    fn default() -> Self {
        Self {
            maximum_overrides_to_analyze: 100,
            maximum_tree_depth: 4,
            maximum_trace_length: 100,
            widening_threshold: 2,
        }
    }
}

/// The resolved taint configuration.
#[derive(Debug, Clone, Default)]
pub struct TaintConfig {
    /// Declared source kind names.
    pub sources: BTreeSet<CompactString>,
    /// Declared sink kind names.
    pub sinks: BTreeSet<CompactString>,
    /// Declared transform names.
    pub transforms: BTreeSet<CompactString>,
    /// Declared feature names.
    pub features: BTreeSet<CompactString>,
    /// All rules, plain and combined, in declaration order.
    pub rules: Vec<Rule>,
    /// Source kinds attached to every string literal.
    pub literal_string_sources: Vec<SourceKind>,
    /// Sink kinds attached to every string literal.
    pub literal_string_sinks: Vec<SinkKind>,
    /// Analysis bounds.
    pub constraints: AnalysisConstraints,
}

impl TaintConfig {
    /// Loads and validates a taint configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|error| match error {
            ConfigError::Invalid { message, .. } => ConfigError::Invalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Parses and validates a taint configuration from JSON text.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawTaintConfig =
            serde_json::from_str(content).map_err(|error| ConfigError::Invalid {
                path: PathBuf::new(),
                message: error.to_string(),
            })?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawTaintConfig) -> Result<Self, ConfigError> {
        let sources: BTreeSet<CompactString> =
            raw.sources.iter().map(|kind| kind.name.clone()).collect();
        let sinks: BTreeSet<CompactString> =
            raw.sinks.iter().map(|kind| kind.name.clone()).collect();
        let transforms: BTreeSet<CompactString> =
            raw.transforms.iter().map(|kind| kind.name.clone()).collect();
        let features: BTreeSet<CompactString> =
            raw.features.iter().map(|kind| kind.name.clone()).collect();

        let mut seen_codes = BTreeSet::new();
        let mut rules = Vec::new();

        for rule in &raw.rules {
            if !seen_codes.insert(rule.code) {
                return Err(ConfigError::DuplicateRuleCode { code: rule.code });
            }
            for source in &rule.sources {
                if !sources.contains(source) {
                    return Err(ConfigError::UndefinedKind {
                        code: rule.code,
                        flavor: "source",
                        kind: source.to_string(),
                    });
                }
            }
            for sink in &rule.sinks {
                if !sinks.contains(sink) {
                    return Err(ConfigError::UndefinedKind {
                        code: rule.code,
                        flavor: "sink",
                        kind: sink.to_string(),
                    });
                }
            }
            for transform in &rule.transforms {
                if !transforms.contains(transform) {
                    return Err(ConfigError::UndefinedKind {
                        code: rule.code,
                        flavor: "transform",
                        kind: transform.to_string(),
                    });
                }
            }
            rules.push(Rule {
                code: rule.code,
                name: rule.name.clone(),
                message_format: rule.message_format.clone(),
                sources: rule.sources.iter().cloned().map(SourceKind::new).collect(),
                sinks: rule.sinks.iter().cloned().map(SinkKind::Named).collect(),
                transforms: rule.transforms.clone(),
                combined: None,
            });
        }

        for rule in &raw.combined_source_rules {
            if !seen_codes.insert(rule.code) {
                return Err(ConfigError::DuplicateRuleCode { code: rule.code });
            }
            let mut halves = Vec::new();
            for (index, half) in rule.rule.iter().enumerate() {
                for source in &half.sources {
                    if !sources.contains(source) {
                        return Err(ConfigError::UndefinedKind {
                            code: rule.code,
                            flavor: "source",
                            kind: source.to_string(),
                        });
                    }
                }
                let label = COMBINED_LABELS.get(index).copied().unwrap_or("z");
                halves.push(CombinedHalf {
                    sink: SinkKind::partial(half.partial_sink.clone(), label),
                    sources: half.sources.iter().cloned().map(SourceKind::new).collect(),
                });
            }
            let all_sources = halves
                .iter()
                .flat_map(|half| half.sources.iter().cloned())
                .collect();
            let all_sinks = halves.iter().map(|half| half.sink.clone()).collect();
            rules.push(Rule {
                code: rule.code,
                name: rule.name.clone(),
                message_format: rule.message_format.clone(),
                sources: all_sources,
                sinks: all_sinks,
                transforms: Vec::new(),
                combined: Some(halves),
            });
        }

        let constraints = AnalysisConstraints {
            maximum_overrides_to_analyze: raw
                .analysis_model_constraints
                .maximum_overrides_to_analyze
                .unwrap_or(AnalysisConstraints::default().maximum_overrides_to_analyze),
            maximum_tree_depth: raw
                .analysis_model_constraints
                .maximum_tree_depth
                .unwrap_or(AnalysisConstraints::default().maximum_tree_depth),
            maximum_trace_length: raw
                .analysis_model_constraints
                .maximum_trace_length
                .unwrap_or(AnalysisConstraints::default().maximum_trace_length),
            widening_threshold: raw
                .analysis_model_constraints
                .widening_threshold
                .unwrap_or(AnalysisConstraints::default().widening_threshold),
        };

        Ok(Self {
            sources,
            sinks,
            transforms,
            features,
            rules,
            literal_string_sources: raw
                .implicit_sources
                .literal_strings
                .iter()
                .map(|kind| SourceKind::new(kind.name.clone()))
                .collect(),
            literal_string_sinks: raw
                .implicit_sinks
                .literal_strings
                .iter()
                .map(|kind| SinkKind::Named(kind.name.clone()))
                .collect(),
            constraints,
        })
    }

    /// Whether the source kind was declared.
    #[must_use]
    pub fn is_declared_source(&self, name: &str) -> bool {
        self.sources.contains(name)
    }

    /// Whether the sink kind was declared.
    #[must_use]
    pub fn is_declared_sink(&self, name: &str) -> bool {
        self.sinks.contains(name)
    }

    /// The partial-sink kind a model annotation refers to, resolved
    /// against the combined rules (the rule half supplies the label).
    #[must_use]
    pub fn resolve_partial_sink(&self, name: &str) -> Option<SinkKind> {
        for rule in &self.rules {
            if let Some(halves) = &rule.combined {
                for half in halves {
                    if let SinkKind::Partial { kind, .. } = &half.sink {
                        if kind == name {
                            return Some(half.sink.clone());
                        }
                    }
                }
            }
        }
        None
    }

}

// ---------------------------------------------------------------------------
// Analyzer options (TOML), discovered by upward traversal.
// ---------------------------------------------------------------------------

/// Options from `.taintflow.toml` or `pyproject.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Options {
    /// The main options table.
    #[serde(default)]
    pub taintflow: AnalyzerOptions,
}

/// Tunables not part of the taint configuration proper.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzerOptions {
    /// Worker count for the scheduler (defaults to the CPU count).
    pub jobs: Option<usize>,
    /// Folders excluded from source discovery.
    pub exclude_folders: Option<Vec<String>>,
    /// Fully qualified methods whose overrides are never analyzed.
    pub skip_overrides: Option<Vec<String>>,
    /// Abort on the first invalid model instead of dropping it.
    pub verify_models: Option<bool>,
    /// Capacity of the shared model table.
    pub model_table_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct PyProject {
    tool: ToolConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct ToolConfig {
    taintflow: AnalyzerOptions,
}

impl Options {
    /// Loads options starting from a specific path and traversing up.
    #[must_use]
    pub fn load_from_path(path: &Path) -> Self {
        let mut current = path.to_path_buf();
        if current.is_file() {
            current.pop();
        }

        loop {
            let options_toml = current.join(".taintflow.toml");
            if options_toml.exists() {
                if let Ok(content) = fs::read_to_string(&options_toml) {
                    if let Ok(options) = toml::from_str::<Options>(&content) {
                        return options;
                    }
                }
            }

            let pyproject_toml = current.join("pyproject.toml");
            if pyproject_toml.exists() {
                if let Ok(content) = fs::read_to_string(&pyproject_toml) {
                    if let Ok(pyproject) = toml::from_str::<PyProject>(&content) {
                        return Options {
                            taintflow: pyproject.tool.taintflow,
                        };
                    }
                }
            }

            if !current.pop() {
                break;
            }
        }

        Options::default()
    }
}
