// src/commands/install.rs
//! Package installation

use super::{print_deployed, transaction_engine};
use anyhow::{Context, Result};
use console::style;
use legendary::{Config, TransactionKind};
use tracing::info;

/// Install packages in one transaction
pub fn cmd_install(config: Config, packages: &[String], quiet: bool) -> Result<()> {
    info!("Installing packages: {:?}", packages);
    println!(
        "{}",
        style(format!("Installing package(s): {}", packages.join(" "))).green()
    );

    let engine = transaction_engine(config, TransactionKind::Install, quiet);
    let report = engine
        .install(packages)
        .with_context(|| format!("Failed to install {}", packages.join(" ")))?;

    print_deployed("Installation complete.", &report);
    Ok(())
}
