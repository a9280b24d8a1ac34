// src/commands/mod.rs
//! Command handlers for the Legendary CLI

mod clean;
mod info;
mod install;
pub mod progress;
mod remove;
mod rollback;
mod update;

pub use clean::cmd_clean;
pub use info::cmd_info;
pub use install::cmd_install;
pub use remove::cmd_remove;
pub use rollback::cmd_rollback;
pub use update::cmd_update;

use anyhow::{Context, Result};
use console::style;
use legendary::{
    Config, HostServices, LogProgress, TransactionEngine, TransactionKind, TransactionReport,
};
use progress::AnimatedRunner;
use std::path::Path;
use std::sync::Arc;

/// Load the configuration file, or the built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    Config::load(path).context("Failed to load configuration")
}

/// Engine on the live system, animated unless `quiet`
fn transaction_engine(config: Config, kind: TransactionKind, quiet: bool) -> TransactionEngine {
    let mut host = HostServices::linux();
    if !quiet {
        host.runner = Arc::new(AnimatedRunner::new(host.runner));
    }
    TransactionEngine::new(config, host).with_progress(Arc::new(LogProgress::new(kind.to_string())))
}

fn print_deployed(summary: &str, report: &TransactionReport) {
    println!(
        "{} Deployed snapshot {}.",
        style(summary).green(),
        report.snapshot.id
    );
    print_reboot_hint();
}

fn print_reboot_hint() {
    println!("{}", style("Reboot to apply changes.").green().bold());
}
