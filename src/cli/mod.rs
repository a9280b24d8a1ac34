// src/cli/mod.rs
//! CLI definitions for Legendary
//!
//! Transactional commands (each runs in its own snapshot):
//! - `install` - Install one or more packages
//! - `remove` - Remove one or more packages
//! - `update` - Full system update, then sweep old snapshots
//!
//! Maintenance:
//! - `rollback` - Make the previous snapshot the default again
//! - `clean` - Delete snapshots past the retention window, optionally orphans
//! - `info` - Show the deployed snapshot, all snapshots and suspected orphans
//! - `completions` - Shell completion scripts

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "legendary")]
#[command(author = "LegendaryOS")]
#[command(version)]
#[command(about = "Atomic package transactions on btrfs snapshots", long_about = None)]
pub struct Cli {
    /// Configuration file (default: /etc/legendary/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Do not show the activity animation
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install package(s) in a new snapshot
    Install {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Remove package(s) in a new snapshot
    Remove {
        /// Package names
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Update the whole system in a new snapshot
    Update,

    /// Boot the previous snapshot again after a reboot
    Rollback,

    /// Delete snapshots older than the retention window
    Clean {
        /// Retention window in days (default: retention_days from the config)
        #[arg(long, value_name = "N")]
        days: Option<u32>,

        /// Also reclaim snapshots left behind by interrupted transactions
        #[arg(long)]
        orphans: bool,
    },

    /// Show the deployed snapshot and snapshot history
    Info,

    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
    },
}
