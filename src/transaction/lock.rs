// src/transaction/lock.rs

//! Advisory lock serializing transactions
//!
//! One transaction at a time: the lock is taken before a snapshot identifier
//! is allocated and held until the transaction reaches a terminal state.
//! `clean` takes the same lock so it never races a running transaction.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// First backoff delay; doubles on each retry
const BASE_DELAY_MS: u64 = 100;

/// Exclusive `flock(LOCK_EX)` on the lock file
#[derive(Debug)]
pub struct TransactionLock {
    file: Option<File>,
    path: PathBuf,
}

impl TransactionLock {
    /// Acquire the lock, trying `retries` times with exponential backoff
    /// (100 ms, 200 ms, 400 ms, ...).
    pub fn acquire(path: impl AsRef<Path>, retries: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_lock_file(&path)?;

        let retries = retries.max(1);
        let mut last_error = None;

        for attempt in 0..retries {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    debug!("Transaction lock busy (attempt {}/{}): {}", attempt + 1, retries, e);
                    last_error = Some(e);
                    if attempt < retries - 1 {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS << attempt));
                    }
                }
            }
        }

        if let Some(e) = last_error {
            let holder = fs::read_to_string(&path)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .map(|pid| format!(" (held by PID {})", pid))
                .unwrap_or_default();
            return Err(Error::ConcurrencyFault(format!(
                "Another transaction is in progress{}: could not lock {} after {} attempts: {}",
                holder,
                path.display(),
                retries,
                e
            )));
        }

        Self::locked(file, path)
    }

    /// Take the lock only if it is free right now. `None` means another
    /// process holds it.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = open_lock_file(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Self::locked(file, path).map(Some),
            Err(e) => {
                debug!("Transaction lock {} is busy: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    fn locked(mut file: File, path: PathBuf) -> Result<Self> {
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        info!("Acquired transaction lock at {}", path.display());
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock now rather than at drop
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.set_len(0)?;
            file.unlock()?;
            debug!("Released transaction lock at {}", self.path.display());
        }
        Ok(())
    }
}

impl Drop for TransactionLock {
    fn drop(&mut self) {
        if let Err(e) = self.unlock() {
            warn!("Failed to release transaction lock {}: {}", self.path.display(), e);
        }
    }
}

/// Not truncated: the holder's PID stays readable until we own the lock
fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}
