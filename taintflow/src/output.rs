//! Terminal output formatting.

use std::collections::BTreeMap;
use std::io::Write;

use colored::Colorize;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use crate::analysis::Issue;

/// Prints each issue as a single line.
///
/// # Errors
///
/// Returns an error if writing to the output fails.
pub fn print_issues(writer: &mut impl Write, issues: &[Issue]) -> std::io::Result<()> {
    for issue in issues {
        writeln!(
            writer,
            "{} {}:{} [{}] {}",
            "issue".red().bold(),
            issue.filename,
            issue.location.line,
            issue.code,
            issue.message
        )?;
    }
    Ok(())
}

/// Prints the per-rule summary table.
///
/// # Errors
///
/// Returns an error if writing to the output fails.
pub fn print_summary(
    writer: &mut impl Write,
    issues: &[Issue],
    callables: usize,
    epochs: usize,
) -> std::io::Result<()> {
    let mut per_rule: BTreeMap<u32, usize> = BTreeMap::new();
    for issue in issues {
        *per_rule.entry(issue.code).or_insert(0) += 1;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Rule"), Cell::new("Issues")]);
    for (code, count) in &per_rule {
        table.add_row(vec![Cell::new(code), Cell::new(count)]);
    }
    if !per_rule.is_empty() {
        writeln!(writer, "{table}")?;
    }

    let headline = format!(
        "{} issues across {callables} callables ({epochs} fixpoint epochs)",
        issues.len()
    );
    if issues.is_empty() {
        writeln!(writer, "{}", headline.green())?;
    } else {
        writeln!(writer, "{}", headline.yellow().bold())?;
    }
    Ok(())
}
