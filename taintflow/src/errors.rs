//! Error taxonomy and process exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Process exit codes reported by the binaries.
///
/// Downstream drivers key off these; keep them stable.
pub mod exit_codes {
    /// Success, no issues found.
    pub const SUCCESS: i32 = 0;
    /// Success, one or more issues found.
    pub const FOUND_ISSUES: i32 = 1;
    /// Invalid taint configuration or model validation failure.
    pub const CONFIGURATION_ERROR: i32 = 2;
    /// The shared model table ran out of capacity.
    pub const MODEL_TABLE_FULL: i32 = 6;
    /// Internal failure (worker crash after retry, fixpoint assertion).
    pub const INTERNAL_ERROR: i32 = 7;
}

/// Errors raised while loading or validating the taint configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read taint configuration `{path}`: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON.
    #[error("invalid taint configuration `{path}`: {message}")]
    Invalid {
        /// Offending path.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
    /// A rule references a kind that was never declared.
    #[error("rule {code} references undefined {flavor} kind `{kind}`")]
    UndefinedKind {
        /// Rule code.
        code: u32,
        /// "source", "sink" or "transform".
        flavor: &'static str,
        /// The undeclared kind name.
        kind: String,
    },
    /// Two rules share the same code.
    #[error("duplicate rule code {code}")]
    DuplicateRuleCode {
        /// The duplicated code.
        code: u32,
    },
}

/// A single model validation failure, reported against its model file.
#[derive(Debug, Clone, Error)]
#[error("{path}:{line}: {message}")]
pub struct ModelError {
    /// Model file the declaration came from.
    pub path: PathBuf,
    /// 1-indexed line of the declaration.
    pub line: usize,
    /// Human-readable diagnostic.
    pub message: String,
}

/// Errors surfaced by the scheduler's map/reduce machinery.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A worker died (panicked) twice on the same chunk.
    #[error("analysis worker crashed: {payload}")]
    WorkerCrash {
        /// Panic payload rendered as text.
        payload: String,
    },
    /// The enclosing operation was cancelled before all chunks ran.
    #[error("scheduled work was cancelled")]
    Cancelled,
}

/// Errors surfaced by the shared model table.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The table reached its configured capacity. Fatal.
    #[error("shared model table is full ({capacity} entries)")]
    TableFull {
        /// Configured capacity that was exceeded.
        capacity: usize,
    },
}

/// Top-level analysis failure, mapped onto an exit code at the boundary.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Invalid taint configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Model validation failed under `verify=true`.
    #[error("model verification failed: {0}")]
    ModelVerification(ModelError),
    /// A worker crashed and the retry failed as well.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The shared model table is exhausted.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The fixpoint failed to converge within its epoch bound. Indicates a
    /// broken `less_or_equal`, not an input problem.
    #[error("fixpoint did not converge after {epochs} epochs")]
    NonConvergence {
        /// Number of epochs attempted.
        epochs: usize,
    },
    /// Source tree I/O failure.
    #[error("cannot read source `{path}`: {source}")]
    SourceIo {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Output I/O failure.
    #[error("cannot write results to `{path}`: {source}")]
    OutputIo {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl AnalysisError {
    /// Maps the failure onto its process exit code.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            AnalysisError::Config(_) | AnalysisError::ModelVerification(_) => {
                exit_codes::CONFIGURATION_ERROR
            }
            AnalysisError::Store(_) => exit_codes::MODEL_TABLE_FULL,
            AnalysisError::Scheduler(_)
            | AnalysisError::NonConvergence { .. }
            | AnalysisError::SourceIo { .. }
            | AnalysisError::OutputIo { .. } => exit_codes::INTERNAL_ERROR,
        }
    }
}
