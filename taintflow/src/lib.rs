//! Core library of the taintflow whole-program taint analyzer.
//!
//! taintflow consumes a set of Python modules, a JSON taint configuration
//! (sources, sinks, sanitizers, rules) and user-supplied `.tfmodel` files
//! describing library behavior, and produces issues: flows from
//! attacker-controlled sources to dangerous sinks, with full traces.

// Allow common complexity warnings - these are intentional design choices
#![allow(
    clippy::type_complexity,
    clippy::too_many_arguments,
    clippy::similar_names,
    clippy::items_after_statements
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

/// Symbolic paths into runtime values.
pub mod access_path;

/// Per-callable forward/backward analyses and issue detection.
pub mod analysis;

/// Command-line interface definitions.
pub mod cli;

/// Taint configuration (JSON) and analyzer options (TOML).
pub mod config;

/// Generic lattice kernel: products, over-under sets, path trees.
pub mod domains;

/// End-to-end analysis driver.
pub mod driver;

/// Shared binary entry point.
pub mod entry_point;

/// Error taxonomy and exit codes.
pub mod errors;

/// The interprocedural fixpoint.
pub mod fixpoint;

/// Call graph, override graph and dependency graph.
pub mod graph;

/// Callable models and the model-language parser.
pub mod model;

/// Terminal output formatting.
pub mod output;

/// The control-plane query protocol.
pub mod query;

/// Issue and model JSON serialization.
pub mod report;

/// Name resolution over parsed modules.
pub mod resolver;

/// The parallel work scheduler.
pub mod scheduler;

/// The shared model table.
pub mod store;

/// Concrete taint domains.
pub mod taint;

/// Callable targets.
pub mod target;

/// Shared utilities.
pub mod utils;

pub use analysis::Issue;
pub use driver::{run_analysis, AnalysisOutcome, AnalysisRequest};
pub use model::Model;
pub use target::Target;
