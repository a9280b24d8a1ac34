// src/sweeper.rs

//! Retention sweeper: deletes snapshots older than a retention window
//!
//! The snapshot currently served as root is never deleted, however old.
//! The sweeper checks the default itself and the store refuses such a
//! delete as well.

use crate::error::Result;
use crate::snapshot::{SnapshotId, SnapshotStore};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Deleted snapshots
    pub deleted: Vec<SnapshotId>,
    /// Old enough to delete, kept because it is the live default
    pub protected: Vec<SnapshotId>,
    /// Within the retention window
    pub retained: Vec<SnapshotId>,
    /// Deletions that failed, with the error message
    pub failed: Vec<(SnapshotId, String)>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct RetentionSweeper<'a> {
    store: &'a SnapshotStore,
}

impl<'a> RetentionSweeper<'a> {
    pub fn new(store: &'a SnapshotStore) -> Self {
        Self { store }
    }

    /// Delete every snapshot whose identifier is older than `now - window`.
    ///
    /// Aborts before deleting anything if the live default cannot be
    /// determined. A failed deletion is recorded and the sweep continues.
    pub fn sweep(&self, window: Duration, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - window;
        let default = self.store.current_default_identifier()?;
        let mut report = SweepReport::default();

        debug!(
            "Sweeping snapshots older than {} (default: {})",
            cutoff.format(SnapshotId::FORMAT),
            default.as_ref().map_or("unmanaged", |id| id.as_str())
        );

        for snapshot in self.store.list()? {
            if snapshot.id.timestamp() >= cutoff {
                report.retained.push(snapshot.id);
                continue;
            }

            if default.as_ref() == Some(&snapshot.id) {
                info!("Keeping snapshot {}: it is the current default", snapshot.id);
                report.protected.push(snapshot.id);
                continue;
            }

            match self.store.delete(&snapshot) {
                Ok(()) => report.deleted.push(snapshot.id),
                Err(e) => {
                    warn!("Failed to delete old snapshot {}: {}", snapshot.id, e);
                    report.failed.push((snapshot.id, e.to_string()));
                }
            }
        }

        info!(
            "Sweep finished: {} deleted, {} protected, {} retained, {} failed",
            report.deleted.len(),
            report.protected.len(),
            report.retained.len(),
            report.failed.len()
        );
        Ok(report)
    }
}
