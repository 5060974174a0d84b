//! Shared binary entry point.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;

use crate::cli::{Cli, Commands};
use crate::driver::{run_analysis, AnalysisRequest};
use crate::errors::exit_codes;

/// Parses arguments and runs the requested command, returning the
/// process exit code.
pub fn run_with_args(args: Vec<String>) -> Result<i32> {
    let mut full_args = vec!["taintflow".to_owned()];
    full_args.extend(args);
    let cli = Cli::parse_from(full_args);

    match cli.command {
        Commands::Analyze {
            path,
            models,
            taint_config,
            output,
            save_models_to,
            jobs,
            verify_models,
            find_missing_flows,
            verbose,
            quiet,
        } => {
            install_tracing(verbose);
            let request = AnalysisRequest {
                source_root: path,
                model_paths: models,
                taint_config,
                output: output.clone(),
                save_models_to,
                jobs,
                verify_models,
                find_missing_flows,
                quiet,
            };
            match run_analysis(&request) {
                Ok(outcome) => {
                    let mut stdout = std::io::stdout();
                    for error in &outcome.model_errors {
                        eprintln!("{error}");
                    }
                    if !quiet && output.is_none() {
                        crate::output::print_issues(&mut stdout, &outcome.issues)?;
                    }
                    crate::output::print_summary(
                        &mut stdout,
                        &outcome.issues,
                        outcome.callables,
                        outcome.epochs,
                    )?;
                    if outcome.issues.is_empty() {
                        Ok(exit_codes::SUCCESS)
                    } else {
                        Ok(exit_codes::FOUND_ISSUES)
                    }
                }
                Err(error) => {
                    eprintln!("{}", format!("error: {error}").red());
                    Ok(error.exit_code())
                }
            }
        }
    }
}

/// Installs the tracing subscriber once; later calls are no-ops.
fn install_tracing(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
