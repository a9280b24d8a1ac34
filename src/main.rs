// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use console::style;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // User-facing output comes from the command handlers; logs go to stderr
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "legendary", &mut io::stdout());
        return Ok(());
    }

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Install { packages } => commands::cmd_install(config, &packages, cli.quiet),
        Commands::Remove { packages } => commands::cmd_remove(config, &packages, cli.quiet),
        Commands::Update => commands::cmd_update(config, cli.quiet),
        Commands::Rollback => commands::cmd_rollback(config),
        Commands::Clean { days, orphans } => commands::cmd_clean(config, days, orphans),
        Commands::Info => commands::cmd_info(config),
        Commands::Completions { .. } => Ok(()),
    }
}
