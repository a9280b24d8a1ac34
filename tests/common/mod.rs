// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.
//!
//! `FakeHost` stands in for btrfs, the kernel mount table, and chroot
//! execution. Snapshots are plain directories under a `TempDir`, so no test
//! needs root or a btrfs filesystem.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use legendary::host::{
    CommandOutput, CommandRunner, DefaultSubvolume, Invocation, MountTable, SnapshotBackend,
};
use legendary::{
    CallbackProgress, Config, Error, HostServices, ProgressEvent, Result, Snapshot, SnapshotId,
    SnapshotStore, TransactionEngine,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// ID btrfs gives the top-level subvolume
pub const TOP_LEVEL_ID: u64 = 5;

/// Every call made against the host, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Snapshot(PathBuf),
    Delete(PathBuf),
    SetDefault(u64),
    Bind(PathBuf),
    Unmount(PathBuf),
    Run(PathBuf, Vec<String>),
}

/// Failures to inject
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub snapshot: bool,
    /// Fail the bind whose target ends with this component
    pub bind: Option<String>,
    /// Fail every unmount of the target ending with this component
    pub unmount: Option<String>,
    pub exit_code: i32,
    pub set_default: bool,
    pub delete: bool,
}

#[derive(Debug, Default)]
struct State {
    subvolumes: BTreeMap<PathBuf, u64>,
    next_id: u64,
    default_id: u64,
    mounted: Vec<PathBuf>,
    calls: Vec<Call>,
}

#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<State>,
    pub failures: Mutex<Failures>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_id: 256,
                default_id: TOP_LEVEL_ID,
                ..Default::default()
            }),
            failures: Mutex::new(Failures::default()),
        })
    }

    pub fn services(self: &Arc<Self>) -> HostServices {
        HostServices {
            snapshots: self.clone(),
            mounts: self.clone(),
            runner: self.clone(),
        }
    }

    pub fn fail(&self, update: impl FnOnce(&mut Failures)) {
        update(&mut self.failures.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn binds(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Bind(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn unmounts(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Unmount(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn set_default_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::SetDefault(_)))
            .count()
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().mounted.clone()
    }

    pub fn default_id(&self) -> u64 {
        self.state.lock().unwrap().default_id
    }

    /// Put a snapshot on disk as if an earlier transaction had created it
    pub fn seed(&self, store: &SnapshotStore, id: &str) -> Snapshot {
        let snapshot = store.snapshot_for(&SnapshotId::parse(id).unwrap());
        fs::create_dir_all(&snapshot.subvolume_path).unwrap();
        let mut state = self.state.lock().unwrap();
        let subvol_id = state.next_id;
        state.next_id += 1;
        state
            .subvolumes
            .insert(snapshot.subvolume_path.clone(), subvol_id);
        snapshot
    }

    /// Make `snapshot` the default without recording a call
    pub fn deploy(&self, snapshot: &Snapshot) {
        let mut state = self.state.lock().unwrap();
        state.default_id = state.subvolumes[&snapshot.subvolume_path];
    }

    /// Leave a mount behind, as a killed process would
    pub fn leave_mounted(&self, target: PathBuf) {
        self.state.lock().unwrap().mounted.push(target);
    }
}

impl SnapshotBackend for FakeHost {
    fn snapshot(&self, _source: &Path, dest: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Snapshot(dest.to_path_buf()));
        if self.failures.lock().unwrap().snapshot {
            return Err(Error::StorageFault("No space left on device".to_string()));
        }
        fs::create_dir(dest)?;
        let id = state.next_id;
        state.next_id += 1;
        state.subvolumes.insert(dest.to_path_buf(), id);
        Ok(())
    }

    fn delete(&self, subvolume: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Delete(subvolume.to_path_buf()));
        if self.failures.lock().unwrap().delete {
            return Err(Error::StorageFault("Device or resource busy".to_string()));
        }
        if state.mounted.iter().any(|m| m.starts_with(subvolume)) {
            return Err(Error::StorageFault(format!(
                "{} has active mounts",
                subvolume.display()
            )));
        }
        fs::remove_dir_all(subvolume)?;
        state.subvolumes.remove(subvolume);
        Ok(())
    }

    fn subvolume_id(&self, subvolume: &Path) -> Result<u64> {
        self.state
            .lock()
            .unwrap()
            .subvolumes
            .get(subvolume)
            .copied()
            .ok_or_else(|| Error::StorageFault(format!("{} is not a subvolume", subvolume.display())))
    }

    fn default_subvolume(&self, _mount_root: &Path) -> Result<DefaultSubvolume> {
        let state = self.state.lock().unwrap();
        let path = state
            .subvolumes
            .iter()
            .find(|(_, id)| **id == state.default_id)
            .map(|(path, _)| path.clone())
            .unwrap_or_else(|| PathBuf::from("@"));
        Ok(DefaultSubvolume {
            id: state.default_id,
            path,
        })
    }

    fn set_default(&self, id: u64, _mount_root: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::SetDefault(id));
        if self.failures.lock().unwrap().set_default {
            return Err(Error::StorageFault("ioctl failed".to_string()));
        }
        state.default_id = id;
        Ok(())
    }
}

impl MountTable for FakeHost {
    fn bind(&self, _source: &Path, target: &Path) -> Result<()> {
        if let Some(name) = &self.failures.lock().unwrap().bind {
            if target.ends_with(name) {
                return Err(Error::MountFault(format!("bind {} failed", target.display())));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Bind(target.to_path_buf()));
        state.mounted.push(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        if let Some(name) = &self.failures.lock().unwrap().unmount {
            if target.ends_with(name) {
                return Err(Error::MountFault(format!("{}: target is busy", target.display())));
            }
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Unmount(target.to_path_buf()));
        state.mounted.retain(|m| m != target);
        Ok(())
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        Ok(self.state.lock().unwrap().mounted.iter().any(|m| m == target))
    }
}

impl CommandRunner for FakeHost {
    fn run_chrooted(&self, root: &Path, invocation: &Invocation) -> Result<CommandOutput> {
        self.state
            .lock()
            .unwrap()
            .calls
            .push(Call::Run(root.to_path_buf(), invocation.args.clone()));
        let code = self.failures.lock().unwrap().exit_code;
        Ok(CommandOutput {
            code,
            stdout: String::new(),
            stderr: if code == 0 {
                String::new()
            } else {
                "error: target not found: vim\n".to_string()
            },
        })
    }
}

/// 2025-03-01 12:00:00 UTC
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

/// Identifier `days` before `base_time()`
pub fn days_ago(days: i64) -> String {
    SnapshotId::from_datetime(base_time() - Duration::days(days))
        .as_str()
        .to_string()
}

/// A temp directory laid out as a host, plus the fake collaborators
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub host: Arc<FakeHost>,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("live")).unwrap();
        fs::write(root.join("resolv.conf"), "nameserver 9.9.9.9\n").unwrap();

        let config = Config {
            snapshot_dir: root.join("snapshots"),
            live_root: root.join("live"),
            lock_path: root.join("run/transaction.lock"),
            resolv_conf: root.join("resolv.conf"),
            lock_retries: 1,
            ..Config::default()
        };

        Self {
            temp_dir,
            host: FakeHost::new(),
            config,
        }
    }

    /// Engine whose clock starts at `base_time()` and ticks one second per reading
    pub fn engine(&self) -> TransactionEngine {
        let ticks = AtomicI64::new(0);
        TransactionEngine::new(self.config.clone(), self.host.services())
            .with_clock(move || base_time() + Duration::seconds(ticks.fetch_add(1, Ordering::SeqCst)))
    }

    /// Engine that records every progress event
    pub fn observed_engine(&self) -> (TransactionEngine, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let progress = CallbackProgress::new(move |event| sink.lock().unwrap().push(event));
        (self.engine().with_progress(Arc::new(progress)), events)
    }

    pub fn store(&self) -> SnapshotStore {
        SnapshotStore::new(&self.config, self.host.clone())
    }

    /// Names of the entries under the snapshot directory
    pub fn snapshot_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = match fs::read_dir(&self.config.snapshot_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}

/// State names reported through `set_message`
pub fn states(events: &[ProgressEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Message(m) => Some(m.clone()),
            _ => None,
        })
        .collect()
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
