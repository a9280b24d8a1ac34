// src/lib.rs

//! Legendary: transactional system changes on btrfs
//!
//! Every package install, removal, or system update runs against a fresh
//! copy-on-write snapshot of the root subvolume, inside a chroot. The
//! snapshot only goes live through an atomic default-subvolume switch, so a
//! failure at any step leaves the running system untouched.
//!
//! # Architecture
//!
//! - Snapshot store: timestamp-named snapshots under one base directory
//! - Chroot session: host pseudo-filesystems and DNS config bound in, torn
//!   down in reverse order
//! - Transaction engine: create, prepare, run, cleanup, deploy, or roll back;
//!   also switches back to the previous snapshot on request
//! - Retention sweeper and orphan recovery: bounded storage, crash leftovers

pub mod chroot;
pub mod config;
mod error;
pub mod host;
pub mod progress;
pub mod recovery;
pub mod snapshot;
pub mod sweeper;
pub mod transaction;

pub use chroot::{Binding, BindingKind, ChrootSession, standard_bindings};
pub use config::Config;
pub use error::{Error, Result};
pub use progress::{CallbackProgress, LogProgress, ProgressEvent, ProgressTracker, SilentProgress};
pub use recovery::{OrphanReason, OrphanReport, OrphanScanner, ReclaimReport};
pub use snapshot::{Snapshot, SnapshotId, SnapshotStore};
pub use sweeper::{RetentionSweeper, SweepReport};
pub use transaction::{
    CleanReport, HostServices, RollbackReport, ScanLock, SystemStatus, Transaction,
    TransactionEngine, TransactionKind, TransactionLock, TransactionReport, TransactionState,
};
