// src/recovery.rs

//! Orphaned snapshot detection and reclamation
//!
//! A process killed mid-transaction leaves its snapshot behind, possibly
//! with bind mounts still active inside it. Every transaction holds the
//! transaction lock until it reaches a terminal state, so a scan made under
//! that lock sees no in-flight transaction.
//!
//! A snapshot other than the current default is a suspected orphan when:
//! - any of its chroot bindings is still in the mount table
//! - its identifier sorts after the default's (a deployed transaction
//!   always becomes the default, so a newer one never finished)
//! - its directory has no subvolume entry (creation was interrupted)
//!
//! The second rule only applies when the default is a managed snapshot.

use crate::chroot::{Binding, active_bindings, release_bindings};
use crate::error::Result;
use crate::host::MountTable;
use crate::snapshot::{Snapshot, SnapshotId, SnapshotStore};
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

/// Why a snapshot is suspected to be an orphan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrphanReason {
    /// Bindings left mounted inside the snapshot
    DanglingMounts(Vec<PathBuf>),
    /// Created after the current default but never deployed
    NewerThanDefault,
    /// Directory without a subvolume
    MissingSubvolume,
}

impl fmt::Display for OrphanReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingMounts(mounts) => {
                write!(f, "{} binding(s) still mounted", mounts.len())
            }
            Self::NewerThanDefault => f.write_str("newer than the deployed snapshot"),
            Self::MissingSubvolume => f.write_str("no subvolume"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanReport {
    pub snapshot: Snapshot,
    pub reasons: Vec<OrphanReason>,
}

/// Outcome of reclaiming orphans
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub reclaimed: Vec<SnapshotId>,
    pub failed: Vec<(SnapshotId, String)>,
}

pub struct OrphanScanner<'a> {
    store: &'a SnapshotStore,
    mounts: &'a dyn MountTable,
    bindings: Vec<Binding>,
}

impl<'a> OrphanScanner<'a> {
    /// `bindings` is the binding set every chroot session uses
    pub fn new(store: &'a SnapshotStore, mounts: &'a dyn MountTable, bindings: Vec<Binding>) -> Self {
        Self {
            store,
            mounts,
            bindings,
        }
    }

    /// Find suspected orphans. Read-only.
    pub fn scan(&self) -> Result<Vec<OrphanReport>> {
        let default = self.store.current_default_identifier()?;
        let mut orphans = Vec::new();

        for snapshot in self.store.list()? {
            if default.as_ref() == Some(&snapshot.id) {
                continue;
            }

            let mut reasons = Vec::new();
            let mounted = active_bindings(&snapshot.subvolume_path, &self.bindings, self.mounts)?;
            if !mounted.is_empty() {
                reasons.push(OrphanReason::DanglingMounts(mounted));
            }
            if default.as_ref().is_some_and(|d| snapshot.id > *d) {
                reasons.push(OrphanReason::NewerThanDefault);
            }
            if !snapshot.has_subvolume() {
                reasons.push(OrphanReason::MissingSubvolume);
            }

            if !reasons.is_empty() {
                orphans.push(OrphanReport { snapshot, reasons });
            }
        }

        Ok(orphans)
    }

    /// Release leftover bindings and delete each orphan.
    ///
    /// The caller must hold the transaction lock.
    pub fn reclaim(&self, orphans: &[OrphanReport]) -> ReclaimReport {
        let mut report = ReclaimReport::default();

        for orphan in orphans {
            let snapshot = &orphan.snapshot;
            if let Err(e) = release_bindings(&snapshot.subvolume_path, &self.bindings, self.mounts) {
                warn!("Failed to release bindings of orphan {}: {}", snapshot.id, e);
            }
            match self.store.delete(snapshot) {
                Ok(()) => {
                    info!("Reclaimed orphaned snapshot {}", snapshot.id);
                    report.reclaimed.push(snapshot.id.clone());
                }
                Err(e) => {
                    warn!("Failed to reclaim orphan {}: {}", snapshot.id, e);
                    report.failed.push((snapshot.id.clone(), e.to_string()));
                }
            }
        }

        report
    }
}
