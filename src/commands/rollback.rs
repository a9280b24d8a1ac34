// src/commands/rollback.rs
//! Switch back to the previous snapshot

use super::print_reboot_hint;
use anyhow::{Context, Result};
use console::style;
use legendary::{Config, HostServices, TransactionEngine};

pub fn cmd_rollback(config: Config) -> Result<()> {
    println!("{}", style("Rolling back to the previous snapshot...").green());

    let engine = TransactionEngine::new(config, HostServices::linux());
    let report = engine.rollback().context("Rollback failed")?;

    println!(
        "{} Default is now snapshot {} (was {}).",
        style("Rollback complete.").green(),
        report.to.id,
        report.from
    );
    print_reboot_hint();
    Ok(())
}
