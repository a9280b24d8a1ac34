// src/commands/info.rs
//! Deployment and snapshot overview

use anyhow::{Context, Result};
use console::style;
use legendary::{Config, HostServices, ScanLock, TransactionEngine};

pub fn cmd_info(config: Config) -> Result<()> {
    let engine = TransactionEngine::new(config, HostServices::linux());
    let status = engine.status().context("Failed to read snapshot state")?;

    println!(
        "{}",
        style(format!(
            "Default subvolume: ID {} ({})",
            status.default.id,
            status.default.path.display()
        ))
        .blue()
    );
    match &status.deployed {
        Some(id) => println!("{}", style(format!("Deployed snapshot: {}", id)).blue()),
        None => println!(
            "{}",
            style("Deployed snapshot: none (default is not a managed snapshot)").blue()
        ),
    }

    println!(
        "{}",
        style(format!("Number of snapshots: {}", status.snapshots.len())).blue()
    );
    for snapshot in &status.snapshots {
        let marker = if status.deployed.as_ref() == Some(&snapshot.id) {
            " (deployed)"
        } else {
            ""
        };
        println!("{}", style(format!("Snapshot: {}{}", snapshot.id, marker)).yellow());
    }

    if let Some(last) = status.last_transaction() {
        println!("{}", style(format!("Last transaction: {}", last)).blue());
    }

    if !status.orphans.is_empty() {
        println!();
        println!("{}", style("Suspected orphaned snapshots:").red().bold());
        for orphan in &status.orphans {
            let reasons: Vec<String> = orphan.reasons.iter().map(|r| r.to_string()).collect();
            println!("  {} ({})", orphan.snapshot.id, reasons.join("; "));
        }
        println!("Run `legendary clean --orphans` to reclaim them.");
    }

    match status.scan_lock {
        ScanLock::Held => {}
        ScanLock::Busy => println!(
            "{}",
            style("A transaction is in progress; its snapshot may be listed as an orphan.").yellow()
        ),
        ScanLock::Unavailable => println!(
            "{}",
            style("Transaction lock not checked; orphans were scanned without it.").yellow()
        ),
    }

    Ok(())
}
