// src/snapshot.rs

//! Snapshot store: copy-on-write clones of the live root
//!
//! Layout on disk:
//!
//! ```text
//! <snapshot_dir>/
//!   20250301120000/        one directory per transaction, named by UTC timestamp
//!     @                    the subvolume itself (clone root)
//! ```
//!
//! Identifiers are `YYYYMMDDHHMMSS`, so lexical order is chronological order.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{DefaultSubvolume, SnapshotBackend};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Timestamp identifier of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId {
    text: String,
    at: DateTime<Utc>,
}

impl SnapshotId {
    /// strftime format of identifiers
    pub const FORMAT: &'static str = "%Y%m%d%H%M%S";

    /// Identifier for the given instant (second precision)
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let text = at.format(Self::FORMAT).to_string();
        // Drop sub-second precision so `at` round-trips through `text`
        let at = NaiveDateTime::parse_from_str(&text, Self::FORMAT)
            .map(|n| n.and_utc())
            .unwrap_or(at);
        Self { text, at }
    }

    /// Identifier for the current wall-clock time
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Parse a directory name; `None` unless it is exactly 14 digits forming a valid time
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let at = NaiveDateTime::parse_from_str(s, Self::FORMAT).ok()?.and_utc();
        Some(Self {
            text: s.to_string(),
            at,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The instant this identifier encodes
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.at
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for SnapshotId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            Error::StorageFault(format!("'{}' is not a snapshot identifier (YYYYMMDDHHMMSS)", s))
        })
    }
}

/// A snapshot directory and the subvolume inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// Top-level directory of the snapshot
    pub root_path: PathBuf,
    /// The copy-on-write subvolume within `root_path`
    pub subvolume_path: PathBuf,
}

impl Snapshot {
    /// Whether the subvolume entry exists at all
    pub fn has_subvolume(&self) -> bool {
        self.subvolume_path.symlink_metadata().is_ok()
    }
}

/// Manages the physical lifecycle of snapshots
pub struct SnapshotStore {
    base_dir: PathBuf,
    subvolume_name: String,
    live_root: PathBuf,
    backend: Arc<dyn SnapshotBackend>,
}

impl SnapshotStore {
    pub fn new(config: &Config, backend: Arc<dyn SnapshotBackend>) -> Self {
        Self {
            base_dir: config.snapshot_dir.clone(),
            subvolume_name: config.subvolume_name.clone(),
            live_root: config.live_root.clone(),
            backend,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Deterministic paths for an identifier
    pub fn snapshot_for(&self, id: &SnapshotId) -> Snapshot {
        let root_path = self.base_dir.join(id.as_str());
        let subvolume_path = root_path.join(&self.subvolume_name);
        Snapshot {
            id: id.clone(),
            root_path,
            subvolume_path,
        }
    }

    /// Clone the live root into a fresh snapshot.
    ///
    /// Refuses to reuse an existing directory. On failure the directory
    /// created here is removed again.
    pub fn create(&self, id: &SnapshotId) -> Result<Snapshot> {
        let snapshot = self.snapshot_for(id);
        if snapshot.root_path.symlink_metadata().is_ok() {
            return Err(Error::StorageFault(format!(
                "Snapshot directory {} already exists",
                snapshot.root_path.display()
            )));
        }

        fs::create_dir_all(&snapshot.root_path).map_err(|e| {
            Error::StorageFault(format!(
                "Failed to create {}: {}",
                snapshot.root_path.display(),
                e
            ))
        })?;

        if let Err(e) = self
            .backend
            .snapshot(&self.live_root, &snapshot.subvolume_path)
        {
            if let Err(rm) = fs::remove_dir(&snapshot.root_path) {
                warn!(
                    "Failed to remove {} after failed snapshot: {}",
                    snapshot.root_path.display(),
                    rm
                );
            }
            return Err(e);
        }

        info!(
            "Created snapshot {} of {}",
            snapshot.subvolume_path.display(),
            self.live_root.display()
        );
        Ok(snapshot)
    }

    /// Delete a snapshot's subvolume and its directory.
    ///
    /// Tolerates a directory without a subvolume (partially created) and a
    /// directory that is already gone. Never deletes the live default.
    pub fn delete(&self, snapshot: &Snapshot) -> Result<()> {
        if snapshot.has_subvolume() {
            match self.backend.subvolume_id(&snapshot.subvolume_path) {
                Ok(id) => {
                    let default = self.backend.default_subvolume(&self.live_root)?;
                    if default.id == id {
                        return Err(Error::StorageFault(format!(
                            "Refusing to delete snapshot {}: it is the current default subvolume",
                            snapshot.id
                        )));
                    }
                    self.backend.delete(&snapshot.subvolume_path)?;
                }
                Err(e) => {
                    // Not a subvolume: only an empty leftover directory is removed
                    debug!(
                        "{} is not a subvolume ({}), removing as plain directory",
                        snapshot.subvolume_path.display(),
                        e
                    );
                    fs::remove_dir(&snapshot.subvolume_path).map_err(|rm| {
                        Error::StorageFault(format!(
                            "{} is neither a subvolume nor an empty directory: {}",
                            snapshot.subvolume_path.display(),
                            rm
                        ))
                    })?;
                }
            }
        }

        if snapshot.root_path.symlink_metadata().is_ok() {
            fs::remove_dir(&snapshot.root_path).map_err(|e| {
                Error::StorageFault(format!(
                    "Failed to remove {}: {}",
                    snapshot.root_path.display(),
                    e
                ))
            })?;
        }

        info!("Deleted snapshot {}", snapshot.id);
        Ok(())
    }

    /// The raw default subvolume of the live filesystem
    pub fn current_default(&self) -> Result<DefaultSubvolume> {
        self.backend.default_subvolume(&self.live_root)
    }

    /// Identifier of the snapshot currently served as root, if it is one of ours
    pub fn current_default_identifier(&self) -> Result<Option<SnapshotId>> {
        let default = self.current_default()?;
        Ok(self
            .identifier_from_subvolume_path(&default.path)
            .filter(|id| self.snapshot_for(id).root_path.exists()))
    }

    /// `.../<id>/<subvolume_name>` -> id
    fn identifier_from_subvolume_path(&self, path: &Path) -> Option<SnapshotId> {
        if path.file_name()?.to_str()? != self.subvolume_name {
            return None;
        }
        let parent = path.parent()?.file_name()?.to_str()?;
        SnapshotId::parse(parent)
    }

    /// Whether this snapshot's subvolume is the live default
    pub fn is_current_default(&self, snapshot: &Snapshot) -> Result<bool> {
        Ok(self.current_default_identifier()?.as_ref() == Some(&snapshot.id))
    }

    /// Atomically make `snapshot` the default subvolume. The single commit point.
    pub fn set_default(&self, snapshot: &Snapshot) -> Result<()> {
        let id = self
            .backend
            .subvolume_id(&snapshot.subvolume_path)
            .map_err(|e| {
                Error::StorageFault(format!(
                    "Cannot resolve subvolume ID of snapshot {}: {}",
                    snapshot.id, e
                ))
            })?;
        self.backend.set_default(id, &self.live_root)?;
        info!("Default subvolume set to {} (ID {})", snapshot.id, id);
        Ok(())
    }

    /// All snapshots in identifier order. Directories with other names are ignored.
    pub fn list(&self) -> Result<Vec<Snapshot>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::StorageFault(format!(
                    "Failed to list {}: {}",
                    self.base_dir.display(),
                    e
                )));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().and_then(SnapshotId::parse) {
                Some(id) => snapshots.push(self.snapshot_for(&id)),
                None => debug!("Ignoring non-snapshot entry {:?}", name),
            }
        }
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(snapshots)
    }
}
