//! Main binary entry point for the taintflow analyzer.

use anyhow::Result;

use taintflow::entry_point;

/// Main entry point of the application.
fn main() -> Result<()> {
    let code = entry_point::run_with_args(std::env::args().skip(1).collect())?;
    std::process::exit(code);
}
