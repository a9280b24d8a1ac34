// src/transaction/mod.rs

//! Transaction coordinator
//!
//! Runs one install, remove, or update as an all-or-nothing operation
//! against a fresh snapshot of the live root:
//!
//! ```text
//! START -> SNAPSHOT_CREATED -> CHROOT_PREPARED -> COMMAND_EXECUTED
//!       -> CHROOT_CLEANED -> DEPLOYED
//!
//! any fault after SNAPSHOT_CREATED -> ROLLBACK -> FAILED
//! ```
//!
//! The live system is touched exactly once, by the default-subvolume switch
//! that enters DEPLOYED. Everything before it happens inside the snapshot;
//! rollback deletes the snapshot and leaves the default untouched.

mod lock;

pub use lock::TransactionLock;

use crate::chroot::{ChrootSession, active_bindings, standard_bindings};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::host::{
    Btrfs, ChrootRunner, CommandRunner, DefaultSubvolume, Invocation, LinuxMounts, MountTable,
    SnapshotBackend,
};
use crate::progress::{ProgressTracker, SilentProgress};
use crate::recovery::{OrphanReport, OrphanScanner, ReclaimReport};
use crate::snapshot::{Snapshot, SnapshotId, SnapshotStore};
use crate::sweeper::{RetentionSweeper, SweepReport};
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How many identifiers are tried when the one for "now" is taken
const ID_ATTEMPTS: u32 = 3;

/// The package operation a transaction performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Install,
    Remove,
    Update,
}

impl TransactionKind {
    /// Package manager operation flag
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Install => "-S",
            Self::Remove => "-R",
            Self::Update => "-Syu",
        }
    }

    /// Install and remove need at least one package name
    pub fn requires_packages(&self) -> bool {
        !matches!(self, Self::Update)
    }

    /// `<package_manager> <flag> --noconfirm <names...>`, names as discrete arguments
    pub fn invocation(&self, package_manager: &Path, packages: &[String]) -> Invocation {
        Invocation::new(package_manager)
            .arg(self.flag())
            .arg("--noconfirm")
            .args(packages.iter().cloned())
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Remove => "remove",
            Self::Update => "update",
        })
    }
}

/// Transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Lock held, nothing created yet
    Start,
    /// Snapshot of the live root exists
    SnapshotCreated,
    /// Host resources bound into the snapshot
    ChrootPrepared,
    /// Package manager ran to completion
    CommandExecuted,
    /// All bindings released
    ChrootCleaned,
    /// Snapshot is the default subvolume - POINT OF NO RETURN
    Deployed,
    /// Discarding the snapshot
    Rollback,
    /// Rolled back
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::SnapshotCreated => "SNAPSHOT_CREATED",
            Self::ChrootPrepared => "CHROOT_PREPARED",
            Self::CommandExecuted => "COMMAND_EXECUTED",
            Self::ChrootCleaned => "CHROOT_CLEANED",
            Self::Deployed => "DEPLOYED",
            Self::Rollback => "ROLLBACK",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Failed)
    }
}

/// Names the step that enters the state, so a failed stage reads
/// "chroot preparation failed: ..."
impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::SnapshotCreated => "snapshot creation",
            Self::ChrootPrepared => "chroot preparation",
            Self::CommandExecuted => "command execution",
            Self::ChrootCleaned => "chroot cleanup",
            Self::Deployed => "deployment",
            Self::Rollback => "rollback",
            Self::Failed => "transaction",
        })
    }
}

/// One install/remove/update operation
#[derive(Debug, Clone)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub packages: Vec<String>,
    /// Owned snapshot, once created
    pub snapshot: Option<Snapshot>,
    pub state: TransactionState,
}

impl Transaction {
    pub fn new(kind: TransactionKind, packages: Vec<String>) -> Self {
        Self {
            kind,
            packages,
            snapshot: None,
            state: TransactionState::Start,
        }
    }
}

/// Result of a deployed transaction
#[derive(Debug, Clone)]
pub struct TransactionReport {
    pub kind: TransactionKind,
    pub packages: Vec<String>,
    /// The snapshot that is now the default subvolume
    pub snapshot: Snapshot,
    /// Post-update retention sweep, if one ran and completed
    pub sweep: Option<SweepReport>,
    /// Why the post-update sweep could not run. Never fails the transaction.
    pub sweep_error: Option<String>,
}

/// Result of `clean`
#[derive(Debug, Clone, Default)]
pub struct CleanReport {
    pub sweep: SweepReport,
    /// Present when orphans were reclaimed
    pub orphans: Option<ReclaimReport>,
}

impl CleanReport {
    /// Number of snapshots that could not be deleted
    pub fn failures(&self) -> usize {
        self.sweep.failed.len() + self.orphans.as_ref().map_or(0, |o| o.failed.len())
    }
}

/// Result of `rollback`
#[derive(Debug, Clone)]
pub struct RollbackReport {
    /// Snapshot that was deployed before
    pub from: SnapshotId,
    /// Snapshot that is now the default subvolume
    pub to: Snapshot,
}

/// How the orphan scan in `status` related to the transaction lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanLock {
    /// Scanned under the lock, so no transaction was in flight
    Held,
    /// Another process holds the lock. Its snapshot may be listed as an orphan.
    Busy,
    /// The lock file could not be opened (usually not running as root)
    Unavailable,
}

/// What is deployed and what is on disk
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub default: DefaultSubvolume,
    /// The deployed snapshot, if the default is one of ours
    pub deployed: Option<SnapshotId>,
    /// All snapshots, oldest first
    pub snapshots: Vec<Snapshot>,
    pub orphans: Vec<OrphanReport>,
    pub scan_lock: ScanLock,
}

impl SystemStatus {
    /// Most recent snapshot, deployed or not
    pub fn last_transaction(&self) -> Option<&SnapshotId> {
        self.snapshots.last().map(|s| &s.id)
    }
}

/// The host collaborators a transaction drives
#[derive(Clone)]
pub struct HostServices {
    pub snapshots: Arc<dyn SnapshotBackend>,
    pub mounts: Arc<dyn MountTable>,
    pub runner: Arc<dyn CommandRunner>,
}

impl HostServices {
    /// btrfs, mount(2) and chroot(2) on the running system
    pub fn linux() -> Self {
        Self {
            snapshots: Arc::new(Btrfs::default()),
            mounts: Arc::new(LinuxMounts::new()),
            runner: Arc::new(ChrootRunner::new()),
        }
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// Sequences snapshot, chroot, and deploy into one atomic operation
pub struct TransactionEngine {
    config: Config,
    store: SnapshotStore,
    mounts: Arc<dyn MountTable>,
    runner: Arc<dyn CommandRunner>,
    progress: Arc<dyn ProgressTracker>,
    clock: Clock,
}

impl TransactionEngine {
    pub fn new(config: Config, host: HostServices) -> Self {
        let store = SnapshotStore::new(&config, host.snapshots);
        Self {
            config,
            store,
            mounts: host.mounts,
            runner: host.runner,
            progress: Arc::new(SilentProgress::new()),
            clock: Box::new(Utc::now),
        }
    }

    /// Report state transitions to `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Source of wall-clock time for snapshot identifiers and sweeps
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn mounts(&self) -> &dyn MountTable {
        self.mounts.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Take the transaction lock for work that must not overlap a transaction
    pub fn lock(&self) -> Result<TransactionLock> {
        TransactionLock::acquire(&self.config.lock_path, self.config.lock_retries)
    }

    /// Orphan scanner over this engine's store and binding set
    pub fn orphan_scanner(&self) -> OrphanScanner<'_> {
        OrphanScanner::new(
            &self.store,
            self.mounts.as_ref(),
            standard_bindings(&self.config.resolv_conf),
        )
    }

    /// Deployed subvolume, snapshot list and suspected orphans.
    ///
    /// Never waits for the transaction lock: it is held for the scan only if
    /// it is free right now, and [`SystemStatus::scan_lock`] says which.
    pub fn status(&self) -> Result<SystemStatus> {
        let (lock, scan_lock) = match TransactionLock::try_acquire(&self.config.lock_path) {
            Ok(Some(lock)) => (Some(lock), ScanLock::Held),
            Ok(None) => (None, ScanLock::Busy),
            Err(e) => {
                debug!("Scanning without the transaction lock: {}", e);
                (None, ScanLock::Unavailable)
            }
        };

        let status = SystemStatus {
            default: self.store.current_default()?,
            deployed: self.store.current_default_identifier()?,
            snapshots: self.store.list()?,
            orphans: self.orphan_scanner().scan()?,
            scan_lock,
        };

        if let Some(lock) = lock
            && let Err(e) = lock.release()
        {
            warn!("Failed to release transaction lock: {}", e);
        }
        Ok(status)
    }

    /// Make the newest intact snapshot older than the deployed one the
    /// default again, holding the transaction lock.
    ///
    /// Nothing is deleted. The snapshot rolled away from sorts after the new
    /// default, so `info` lists it as newer than the deployed snapshot and
    /// `clean --orphans` discards it.
    pub fn rollback(&self) -> Result<RollbackReport> {
        let lock = self.lock()?;
        let result = self.roll_back_default();
        if let Err(e) = lock.release() {
            warn!("Failed to release transaction lock: {}", e);
        }
        result
    }

    fn roll_back_default(&self) -> Result<RollbackReport> {
        let current = self.store.current_default_identifier()?.ok_or_else(|| {
            Error::InvalidRequest(
                "The default subvolume is not a managed snapshot, nothing to roll back to"
                    .to_string(),
            )
        })?;

        let bindings = standard_bindings(&self.config.resolv_conf);
        let mut target = None;
        for snapshot in self.store.list()?.into_iter().rev() {
            if snapshot.id >= current {
                continue;
            }
            if !snapshot.has_subvolume() {
                debug!("Snapshot {} has no subvolume, skipping", snapshot.id);
                continue;
            }
            if !active_bindings(&snapshot.subvolume_path, &bindings, self.mounts.as_ref())?
                .is_empty()
            {
                warn!("Snapshot {} still has bindings mounted, skipping", snapshot.id);
                continue;
            }
            target = Some(snapshot);
            break;
        }

        let target = target.ok_or_else(|| {
            Error::InvalidRequest(format!("No snapshot older than {} to roll back to", current))
        })?;

        self.store.set_default(&target)?;
        info!("Rolled back from {} to {}", current, target.id);
        Ok(RollbackReport {
            from: current,
            to: target,
        })
    }

    /// Sweep snapshots older than `window` and optionally reclaim orphans,
    /// holding the transaction lock throughout.
    pub fn clean(&self, window: chrono::Duration, reclaim_orphans: bool) -> Result<CleanReport> {
        let lock = self.lock()?;

        let sweep = RetentionSweeper::new(&self.store).sweep(window, self.now())?;
        let orphans = if reclaim_orphans {
            let scanner = self.orphan_scanner();
            let found = scanner.scan()?;
            info!("Found {} suspected orphan(s)", found.len());
            Some(scanner.reclaim(&found))
        } else {
            None
        };

        lock.release()?;
        Ok(CleanReport { sweep, orphans })
    }

    pub fn install(&self, packages: &[String]) -> Result<TransactionReport> {
        self.execute(TransactionKind::Install, packages)
    }

    pub fn remove(&self, packages: &[String]) -> Result<TransactionReport> {
        self.execute(TransactionKind::Remove, packages)
    }

    pub fn update(&self) -> Result<TransactionReport> {
        self.execute(TransactionKind::Update, &[])
    }

    /// Run one transaction to a terminal state.
    ///
    /// Returns [`Error::TransactionFailed`] for any fault after the lock is
    /// taken; the live default subvolume is unchanged in that case.
    pub fn execute(&self, kind: TransactionKind, packages: &[String]) -> Result<TransactionReport> {
        validate_packages(kind, packages)?;

        let lock = self.lock()?;
        let mut txn = Transaction::new(kind, packages.to_vec());
        info!("Starting {} transaction: {:?}", kind, txn.packages);
        self.advance(&mut txn, TransactionState::Start);

        let result = self.run(&mut txn).map(|snapshot| {
            let mut report = TransactionReport {
                kind,
                packages: txn.packages.clone(),
                snapshot,
                sweep: None,
                sweep_error: None,
            };
            if kind == TransactionKind::Update {
                self.sweep_after_update(&mut report);
            }
            report
        });

        if let Err(e) = lock.release() {
            warn!("Failed to release transaction lock: {}", e);
        }
        result
    }

    fn run(&self, txn: &mut Transaction) -> Result<Snapshot> {
        let snapshot = match self.allocate_id().and_then(|id| self.store.create(&id)) {
            Ok(snapshot) => snapshot,
            Err(e) => return Err(self.fail(txn, TransactionState::SnapshotCreated, e, None)),
        };
        txn.snapshot = Some(snapshot.clone());
        self.advance(txn, TransactionState::SnapshotCreated);

        let mut session = ChrootSession::new(
            &snapshot,
            standard_bindings(&self.config.resolv_conf),
            self.mounts.as_ref(),
            self.runner.as_ref(),
        );

        if let Err(e) = session.prepare() {
            return Err(self.discard(txn, &mut session, TransactionState::ChrootPrepared, e));
        }
        self.advance(txn, TransactionState::ChrootPrepared);

        let invocation = txn
            .kind
            .invocation(&self.config.package_manager, &txn.packages);
        match session.run(&invocation) {
            Ok(output) => {
                debug!("{} exited 0 ({} bytes of output)", invocation.program_name(), output.stdout.len());
                self.advance(txn, TransactionState::CommandExecuted);
            }
            Err(e @ Error::CommandFault { .. }) => {
                self.advance(txn, TransactionState::CommandExecuted);
                return Err(self.discard(txn, &mut session, TransactionState::CommandExecuted, e));
            }
            Err(e) => {
                return Err(self.discard(txn, &mut session, TransactionState::CommandExecuted, e));
            }
        }

        if let Err(e) = session.cleanup() {
            return Err(self.discard(txn, &mut session, TransactionState::ChrootCleaned, e));
        }
        self.advance(txn, TransactionState::ChrootCleaned);

        if let Err(e) = self.store.set_default(&snapshot) {
            return Err(self.discard(txn, &mut session, TransactionState::Deployed, e));
        }
        self.advance(txn, TransactionState::Deployed);
        self.progress
            .finish_with_message(&format!("deployed snapshot {}", snapshot.id));

        Ok(snapshot)
    }

    /// Identifier for "now". If its directory already exists, wait for the
    /// next second and try again.
    fn allocate_id(&self) -> Result<SnapshotId> {
        for attempt in 1..=ID_ATTEMPTS {
            let now = self.now();
            let id = SnapshotId::from_datetime(now);
            if self.store.snapshot_for(&id).root_path.symlink_metadata().is_err() {
                return Ok(id);
            }
            debug!("Snapshot {} already exists (attempt {}/{})", id, attempt, ID_ATTEMPTS);
            if attempt < ID_ATTEMPTS {
                let millis = 1000 - u64::from(now.timestamp_subsec_millis().min(999));
                thread::sleep(Duration::from_millis(millis));
            }
        }
        Err(Error::StorageFault(format!(
            "Could not allocate a fresh snapshot identifier after {} attempts",
            ID_ATTEMPTS
        )))
    }

    /// Discard the snapshot after a fault. Returns the error to report,
    /// which always carries the first `cause`.
    fn discard(
        &self,
        txn: &mut Transaction,
        session: &mut ChrootSession<'_>,
        stage: TransactionState,
        cause: Error,
    ) -> Error {
        warn!("{} transaction: {} failed: {}", txn.kind, stage, cause);
        self.advance(txn, TransactionState::Rollback);

        if let Err(e) = session.cleanup() {
            warn!("Rollback: chroot cleanup failed: {}", e);
        }

        let mut leaked = None;
        if let Some(snapshot) = &txn.snapshot {
            match self.store.delete(snapshot) {
                Ok(()) => info!("Rollback: discarded snapshot {}", snapshot.id),
                Err(e) => {
                    warn!("Rollback: failed to delete snapshot {}: {}", snapshot.id, e);
                    leaked = Some(snapshot.root_path.clone());
                }
            }
        }

        self.fail(txn, stage, cause, leaked)
    }

    fn fail(
        &self,
        txn: &mut Transaction,
        stage: TransactionState,
        cause: Error,
        leaked_snapshot: Option<PathBuf>,
    ) -> Error {
        self.advance(txn, TransactionState::Failed);
        let err = Error::TransactionFailed {
            stage,
            cause: Box::new(cause),
            leaked_snapshot,
        };
        self.progress.finish_with_error(&err.to_string());
        err
    }

    fn advance(&self, txn: &mut Transaction, state: TransactionState) {
        info!("{} transaction: {} -> {}", txn.kind, txn.state.as_str(), state.as_str());
        txn.state = state;
        self.progress.set_message(state.as_str());
    }

    fn sweep_after_update(&self, report: &mut TransactionReport) {
        let sweeper = RetentionSweeper::new(&self.store);
        match sweeper.sweep(self.config.retention(), self.now()) {
            Ok(sweep) => report.sweep = Some(sweep),
            Err(e) => {
                warn!("Post-update sweep failed: {}", e);
                report.sweep_error = Some(e.to_string());
            }
        }
    }
}

fn validate_packages(kind: TransactionKind, packages: &[String]) -> Result<()> {
    if kind.requires_packages() && packages.is_empty() {
        return Err(Error::InvalidRequest(format!(
            "{} needs at least one package name",
            kind
        )));
    }
    if let Some(bad) = packages
        .iter()
        .find(|p| p.is_empty() || p.starts_with('-'))
    {
        return Err(Error::InvalidRequest(format!(
            "'{}' is not a package name",
            bad
        )));
    }
    Ok(())
}
