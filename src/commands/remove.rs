// src/commands/remove.rs
//! Package removal

use super::{print_deployed, transaction_engine};
use anyhow::{Context, Result};
use console::style;
use legendary::{Config, TransactionKind};
use tracing::info;

/// Remove packages in one transaction
pub fn cmd_remove(config: Config, packages: &[String], quiet: bool) -> Result<()> {
    info!("Removing packages: {:?}", packages);
    println!(
        "{}",
        style(format!("Removing package(s): {}", packages.join(" "))).green()
    );

    let engine = transaction_engine(config, TransactionKind::Remove, quiet);
    let report = engine
        .remove(packages)
        .with_context(|| format!("Failed to remove {}", packages.join(" ")))?;

    print_deployed("Removal complete.", &report);
    Ok(())
}
