// src/commands/clean.rs
//! Snapshot retention and orphan reclamation

use anyhow::{Context, Result, bail};
use console::style;
use legendary::{Config, HostServices, TransactionEngine};

/// Delete snapshots older than `days` (or the configured retention), and
/// with `orphans`, snapshots left behind by interrupted transactions
pub fn cmd_clean(config: Config, days: Option<u32>, orphans: bool) -> Result<()> {
    let days = days.unwrap_or(config.retention_days);
    if days == 0 {
        bail!("--days must be at least 1");
    }

    println!(
        "{}",
        style(format!("Removing snapshots older than {} days...", days)).green()
    );

    let engine = TransactionEngine::new(config, HostServices::linux());
    let report = engine
        .clean(chrono::Duration::days(i64::from(days)), orphans)
        .context("Failed to clean snapshots")?;

    for id in &report.sweep.deleted {
        println!("Deleted snapshot {}", id);
    }
    for id in &report.sweep.protected {
        println!("Kept snapshot {} (currently deployed)", style(id).yellow());
    }
    if let Some(reclaimed) = &report.orphans {
        for id in &reclaimed.reclaimed {
            println!("Reclaimed orphaned snapshot {}", id);
        }
    }

    let failed = report
        .sweep
        .failed
        .iter()
        .chain(report.orphans.iter().flat_map(|o| o.failed.iter()));
    for (id, reason) in failed {
        eprintln!("{} {}: {}", style("failed:").red(), id, reason);
    }

    if report.failures() > 0 {
        bail!("{} snapshot(s) could not be removed", report.failures());
    }

    println!(
        "{} {} snapshot(s) removed.",
        style("Clean complete.").green(),
        report.sweep.deleted.len() + report.orphans.map_or(0, |o| o.reclaimed.len())
    );
    Ok(())
}
