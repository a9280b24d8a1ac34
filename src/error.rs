// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::transaction::TransactionState;

/// Core error types for Legendary
#[derive(Error, Debug)]
pub enum Error {
    /// Snapshot create/delete/deploy primitive failed
    #[error("Storage fault: {0}")]
    StorageFault(String),

    /// A bind mount or unmount failed
    #[error("Mount fault: {0}")]
    MountFault(String),

    /// The command executed inside the chroot exited non-zero
    #[error("{program} exited with status {code}{}", stderr_suffix(.stderr))]
    CommandFault {
        program: String,
        code: i32,
        stderr: String,
    },

    /// Another transaction holds the lock
    #[error("Concurrency fault: {0}")]
    ConcurrencyFault(String),

    /// Invalid or unreadable configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The request cannot be turned into a transaction
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transaction failed and was rolled back.
    ///
    /// `stage` is the state the transaction was entering when the fault hit.
    /// `cause` is always the fault that aborted the transaction, never a
    /// rollback side effect.
    #[error(
        "{stage} failed: {cause}{}",
        leaked_suffix(.leaked_snapshot)
    )]
    TransactionFailed {
        stage: TransactionState,
        cause: Box<Error>,
        leaked_snapshot: Option<PathBuf>,
    },
}

impl Error {
    /// The exit code of a failed chroot command, looking through transaction failures
    pub fn command_exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFault { code, .. } => Some(*code),
            Error::TransactionFailed { cause, .. } => cause.command_exit_code(),
            _ => None,
        }
    }

    /// Snapshot left on disk because rollback could not delete it
    pub fn leaked_snapshot(&self) -> Option<&PathBuf> {
        match self {
            Error::TransactionFailed {
                leaked_snapshot, ..
            } => leaked_snapshot.as_ref(),
            _ => None,
        }
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

fn leaked_suffix(leaked: &Option<PathBuf>) -> String {
    match leaked {
        Some(path) => format!(
            "; snapshot {} could not be removed, manual cleanup required",
            path.display()
        ),
        None => String::new(),
    }
}

/// Result type alias using Legendary's Error type
pub type Result<T> = std::result::Result<T, Error>;
