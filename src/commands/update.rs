// src/commands/update.rs
//! System update

use super::{print_deployed, transaction_engine};
use anyhow::{Context, Result};
use console::style;
use legendary::{Config, TransactionKind};

/// Update the whole system in one transaction, then sweep old snapshots.
///
/// Sweep problems are printed as warnings; the update itself has already
/// been deployed at that point.
pub fn cmd_update(config: Config, quiet: bool) -> Result<()> {
    println!("{}", style("Updating system...").green());

    let engine = transaction_engine(config, TransactionKind::Update, quiet);
    let report = engine.update().context("System update failed")?;

    print_deployed("Update complete.", &report);

    if let Some(sweep) = &report.sweep {
        if !sweep.deleted.is_empty() {
            println!("Removed {} old snapshot(s).", sweep.deleted.len());
        }
        for (id, reason) in &sweep.failed {
            println!(
                "{} could not remove old snapshot {}: {}",
                style("warning:").yellow().bold(),
                id,
                reason
            );
        }
    }
    if let Some(reason) = &report.sweep_error {
        println!(
            "{} old snapshots were not cleaned: {}",
            style("warning:").yellow().bold(),
            reason
        );
    }

    Ok(())
}
