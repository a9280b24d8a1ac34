// src/chroot.rs

//! Chroot sessions inside a snapshot
//!
//! A session binds the host's kernel pseudo-filesystems and DNS resolver
//! configuration into a snapshot, runs one command with the snapshot as its
//! root, and unmounts everything again in reverse order:
//!
//! ```text
//! prepare:  proc -> sys -> dev -> run -> etc/resolv.conf
//! cleanup:  etc/resolv.conf -> run -> dev -> sys -> proc
//! ```
//!
//! Cleanup consults the live mount table rather than trusting its own
//! bookkeeping, so it is safe to repeat and safe after a partial prepare.

use crate::error::{Error, Result};
use crate::host::{CommandOutput, CommandRunner, Invocation, MountTable};
use crate::snapshot::Snapshot;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pseudo-filesystems bound into every chroot, in mount order
pub const PSEUDO_FILESYSTEMS: [&str; 4] = ["proc", "sys", "dev", "run"];

/// What a binding's mount point is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Directory such as /proc
    PseudoFs,
    /// Single file such as /etc/resolv.conf
    ConfigFile,
}

/// A host path bound onto a mount point inside a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub host_path: PathBuf,
    /// Mount point relative to the snapshot root
    pub target: PathBuf,
    pub kind: BindingKind,
}

impl Binding {
    pub fn pseudo_fs(name: &str) -> Self {
        Self {
            host_path: Path::new("/").join(name),
            target: PathBuf::from(name),
            kind: BindingKind::PseudoFs,
        }
    }

    /// Bind a host file onto the same path inside the snapshot
    pub fn config_file(host_path: impl Into<PathBuf>) -> Self {
        let host_path = host_path.into();
        let target = host_path
            .strip_prefix("/")
            .unwrap_or(&host_path)
            .to_path_buf();
        Self {
            host_path,
            target,
            kind: BindingKind::ConfigFile,
        }
    }

    /// Absolute mount point under `root`
    pub fn mount_point(&self, root: &Path) -> PathBuf {
        root.join(&self.target)
    }
}

/// The fixed binding set: proc, sys, dev, run, then the resolver config
pub fn standard_bindings(resolv_conf: &Path) -> Vec<Binding> {
    let mut bindings: Vec<Binding> = PSEUDO_FILESYSTEMS
        .iter()
        .map(|name| Binding::pseudo_fs(name))
        .collect();
    bindings.push(Binding::config_file(resolv_conf));
    bindings
}

/// Unmount every binding under `root` that is still mounted, in reverse order.
///
/// Keeps going after a failure so one busy mount does not strand the rest;
/// the first failure is returned.
pub fn release_bindings(root: &Path, bindings: &[Binding], mounts: &dyn MountTable) -> Result<()> {
    let mut first_error = None;

    for binding in bindings.iter().rev() {
        let target = binding.mount_point(root);
        let result = match mounts.is_mounted(&target) {
            Ok(true) => mounts.unmount(&target),
            Ok(false) => {
                debug!("{} not mounted, skipping", target.display());
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Failed to release {}: {}", target.display(), e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Mount points under `root` that are still present in the mount table
pub fn active_bindings(
    root: &Path,
    bindings: &[Binding],
    mounts: &dyn MountTable,
) -> Result<Vec<PathBuf>> {
    let mut active = Vec::new();
    for binding in bindings {
        let target = binding.mount_point(root);
        if mounts.is_mounted(&target)? {
            active.push(target);
        }
    }
    Ok(active)
}

/// An isolated execution environment inside one snapshot
pub struct ChrootSession<'a> {
    root: PathBuf,
    bindings: Vec<Binding>,
    mounts: &'a dyn MountTable,
    runner: &'a dyn CommandRunner,
    /// Mount points established by `prepare`, in mount order
    mounted: Vec<PathBuf>,
}

impl<'a> ChrootSession<'a> {
    pub fn new(
        snapshot: &Snapshot,
        bindings: Vec<Binding>,
        mounts: &'a dyn MountTable,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            root: snapshot.subvolume_path.clone(),
            bindings,
            mounts,
            runner,
            mounted: Vec::new(),
        }
    }

    /// Filesystem root of the session
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mount points currently held by this session, in mount order
    pub fn mounted(&self) -> &[PathBuf] {
        &self.mounted
    }

    /// Bind every host resource into the snapshot.
    ///
    /// Stops at the first failure; whatever was mounted so far stays
    /// mounted until [`cleanup`](Self::cleanup).
    pub fn prepare(&mut self) -> Result<()> {
        for binding in &self.bindings {
            let target = binding.mount_point(&self.root);

            match binding.kind {
                BindingKind::PseudoFs => {
                    fs::create_dir_all(&target).map_err(|e| {
                        Error::MountFault(format!(
                            "Failed to create mount point {}: {}",
                            target.display(),
                            e
                        ))
                    })?;
                }
                BindingKind::ConfigFile => {
                    if !binding.host_path.exists() {
                        warn!(
                            "{} does not exist on the host, not binding it",
                            binding.host_path.display()
                        );
                        continue;
                    }
                    // A symlink here (e.g. into /run) would be followed on the
                    // host side; it already resolves through the bound pseudo-fs.
                    if target
                        .symlink_metadata()
                        .is_ok_and(|m| m.file_type().is_symlink())
                    {
                        debug!("{} is a symlink, not binding over it", target.display());
                        continue;
                    }
                    ensure_file(&target)?;
                }
            }

            self.mounts.bind(&binding.host_path, &target)?;
            self.mounted.push(target);
        }

        info!(
            "Prepared chroot at {} ({} bindings)",
            self.root.display(),
            self.mounted.len()
        );
        Ok(())
    }

    /// Run `invocation` with the snapshot as root.
    ///
    /// A non-zero exit becomes [`Error::CommandFault`] carrying the exit code
    /// and captured stderr.
    pub fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        info!("Running in chroot: {}", invocation);
        let output = self.runner.run_chrooted(&self.root, invocation)?;
        if !output.success() {
            return Err(Error::CommandFault {
                program: invocation.program_name(),
                code: output.code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    /// Unmount every binding in reverse order. Idempotent.
    pub fn cleanup(&mut self) -> Result<()> {
        let result = release_bindings(&self.root, &self.bindings, self.mounts);
        let mounts = self.mounts;
        self.mounted
            .retain(|target| mounts.is_mounted(target).unwrap_or(true));
        if result.is_ok() {
            debug!("Cleaned up chroot at {}", self.root.display());
        }
        result
    }
}

impl Drop for ChrootSession<'_> {
    fn drop(&mut self) {
        if !self.mounted.is_empty() {
            warn!(
                "Chroot session at {} dropped with {} active bindings, releasing",
                self.root.display(),
                self.mounted.len()
            );
            let _ = release_bindings(&self.root, &self.bindings, self.mounts);
        }
    }
}

fn ensure_file(target: &Path) -> Result<()> {
    let io_err = |e: std::io::Error| {
        Error::MountFault(format!(
            "Failed to create mount point {}: {}",
            target.display(),
            e
        ))
    };
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    if !target.exists() {
        File::create(target).map_err(io_err)?;
    }
    Ok(())
}
