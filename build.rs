// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn packages_arg() -> Arg {
    Arg::new("packages")
        .required(true)
        .num_args(1..)
        .help("Package names")
}

fn build_cli() -> Command {
    Command::new("legendary")
        .version(env!("CARGO_PKG_VERSION"))
        .author("LegendaryOS")
        .about("Atomic package transactions on btrfs snapshots")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .global(true)
                .help("Configuration file (default: /etc/legendary/config.toml)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Show debug logging"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Do not show the activity animation"),
        )
        .subcommand(
            Command::new("install")
                .about("Install package(s) in a new snapshot")
                .arg(packages_arg()),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove package(s) in a new snapshot")
                .arg(packages_arg()),
        )
        .subcommand(Command::new("update").about("Update the whole system in a new snapshot"))
        .subcommand(Command::new("rollback").about("Boot the previous snapshot again after a reboot"))
        .subcommand(
            Command::new("clean")
                .about("Delete snapshots older than the retention window")
                .arg(
                    Arg::new("days")
                        .long("days")
                        .value_name("N")
                        .help("Retention window in days (default: retention_days from the config)"),
                )
                .arg(
                    Arg::new("orphans")
                        .long("orphans")
                        .action(ArgAction::SetTrue)
                        .help("Also reclaim snapshots left behind by interrupted transactions"),
                ),
        )
        .subcommand(Command::new("info").about("Show the deployed snapshot and snapshot history"))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("legendary.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
