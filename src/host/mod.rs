// src/host/mod.rs

//! Host collaborators the transaction engine drives.
//!
//! The engine never shells out directly. It talks to three narrow traits:
//!
//! - [`SnapshotBackend`]: copy-on-write clone, delete, and default-subvolume
//!   get/set (btrfs on a real system)
//! - [`MountTable`]: bind mounts and the live mount table
//! - [`CommandRunner`]: process execution with a snapshot as filesystem root
//!
//! The Linux implementations live in the submodules; tests substitute fakes.

mod btrfs;
mod mounts;
mod process;

pub use btrfs::{Btrfs, parse_default_subvolume, parse_subvolume_id};
pub use mounts::{LinuxMounts, parse_mount_points};
pub use process::ChrootRunner;

use crate::error::Result;
use std::path::{Path, PathBuf};

/// The subvolume the filesystem mounts as root when no `subvol=` is given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSubvolume {
    /// Subvolume ID
    pub id: u64,
    /// Path relative to the filesystem's top-level subvolume
    pub path: PathBuf,
}

/// Copy-on-write snapshot primitives
pub trait SnapshotBackend {
    /// Clone `source` into a new subvolume at `dest`
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<()>;

    /// Delete the subvolume at `subvolume`
    fn delete(&self, subvolume: &Path) -> Result<()>;

    /// Resolve a subvolume path to its numeric ID
    fn subvolume_id(&self, subvolume: &Path) -> Result<u64>;

    /// Query the default subvolume of the filesystem mounted at `mount_root`
    fn default_subvolume(&self, mount_root: &Path) -> Result<DefaultSubvolume>;

    /// Atomically repoint the default subvolume of `mount_root`
    fn set_default(&self, id: u64, mount_root: &Path) -> Result<()>;
}

/// Bind mount primitives
pub trait MountTable {
    /// Bind-mount `source` onto `target`
    fn bind(&self, source: &Path, target: &Path) -> Result<()>;

    /// Unmount `target`. Fails only if the target stays mounted.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Whether `target` is currently a mount point
    fn is_mounted(&self, target: &Path) -> Result<bool>;
}

/// A program and its argument vector. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program file name, for messages
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Exit status and captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs a command with a snapshot as its filesystem root
pub trait CommandRunner {
    /// Run `invocation` chrooted into `root` and wait for it.
    ///
    /// A non-zero exit is returned as `Ok`; only failure to start or wait is
    /// an error.
    fn run_chrooted(&self, root: &Path, invocation: &Invocation) -> Result<CommandOutput>;
}
