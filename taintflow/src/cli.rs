//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Help text for the options file, shown at the bottom of --help.
const CONFIG_HELP: &str = "\
CONFIGURATION FILE (.taintflow.toml):
  Create this file in your project root to set defaults.

  [taintflow]
  jobs = 8                       # Worker count
  verify_models = false          # Abort on the first invalid model
  exclude_folders = [\"build\", \".venv\"]
  skip_overrides = [\"app.Base.dispatch\"]
  model_table_capacity = 1048576 # Shared model table bound
";

/// Whole-program taint analysis for Python.
#[derive(Parser, Debug)]
#[command(name = "taintflow", version, after_help = CONFIG_HELP)]
pub struct Cli {
    /// The command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze a source tree and report taint issues.
    Analyze {
        /// Root directory of the analyzed sources.
        path: PathBuf,

        /// Model files or directories (`.tfmodel`).
        #[arg(long = "models")]
        models: Vec<PathBuf>,

        /// JSON taint configuration file.
        #[arg(long = "taint-config")]
        taint_config: Option<PathBuf>,

        /// Write issue JSON to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the final models to this file.
        #[arg(long = "save-models-to")]
        save_models_to: Option<PathBuf>,

        /// Number of analysis workers (defaults to the CPU count).
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Abort on the first invalid model instead of dropping it.
        #[arg(long = "verify-models")]
        verify_models: bool,

        /// `obscure` reports flows into callables with no model.
        #[arg(long = "find-missing-flows")]
        find_missing_flows: Option<String>,

        /// Enable verbose logging.
        #[arg(short, long)]
        verbose: bool,

        /// Show only the summary, no per-issue output.
        #[arg(short, long)]
        quiet: bool,
    },
}
