//! Command-line interface entry point for taintflow.

use anyhow::Result;

use taintflow::entry_point;

fn main() -> Result<()> {
    // Delegate all commands to the shared entry_point function.
    let code = entry_point::run_with_args(std::env::args().skip(1).collect())?;
    std::process::exit(code);
}
