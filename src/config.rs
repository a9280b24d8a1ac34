// src/config.rs

//! Configuration file for Legendary.
//!
//! Every key is optional; a missing default config file yields the built-in
//! defaults, which match the LegendaryOS on-disk layout.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default path for the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/legendary/config.toml";

/// Base directory holding one subdirectory per snapshot
pub const DEFAULT_SNAPSHOT_DIR: &str = "/var/lib/legendary/snapshots";

/// Package manager binary invoked inside the chroot
pub const DEFAULT_PACKAGE_MANAGER: &str = "/usr/lib/LegendaryOS/pacman";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Base directory for snapshots
    pub snapshot_dir: PathBuf,
    /// Name of the subvolume entry inside each snapshot directory
    pub subvolume_name: String,
    /// Live root that gets cloned and whose default subvolume is switched
    pub live_root: PathBuf,
    /// Advisory lock file held for the lifetime of a transaction
    pub lock_path: PathBuf,
    /// Package manager binary, as seen from inside the snapshot
    pub package_manager: PathBuf,
    /// Snapshots older than this many days are swept
    pub retention_days: u32,
    /// Host DNS resolver configuration bound into the chroot
    pub resolv_conf: PathBuf,
    /// Lock acquisition attempts before giving up
    pub lock_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot_dir: PathBuf::from(DEFAULT_SNAPSHOT_DIR),
            subvolume_name: "@".to_string(),
            live_root: PathBuf::from("/"),
            lock_path: PathBuf::from("/var/lib/legendary/transaction.lock"),
            package_manager: PathBuf::from(DEFAULT_PACKAGE_MANAGER),
            retention_days: 30,
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            lock_retries: 5,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// With `None`, reads [`DEFAULT_CONFIG_PATH`] if it exists and falls back
    /// to defaults otherwise. An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::ConfigError(msg) => Error::ConfigError(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse config from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(Error::ConfigError(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.subvolume_name.is_empty() || self.subvolume_name.contains('/') {
            return Err(Error::ConfigError(format!(
                "subvolume_name must be a single path component, got '{}'",
                self.subvolume_name
            )));
        }
        if self.lock_retries == 0 {
            return Err(Error::ConfigError(
                "lock_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Retention window as a duration
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}
