// src/host/btrfs.rs

//! btrfs snapshot backend built on the `btrfs` command-line tool

use super::{DefaultSubvolume, SnapshotBackend};
use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Drives `btrfs subvolume ...`
#[derive(Debug, Clone)]
pub struct Btrfs {
    binary: PathBuf,
}

impl Default for Btrfs {
    fn default() -> Self {
        Self::new("btrfs")
    }
}

impl Btrfs {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `btrfs subvolume <args...>` and return stdout
    fn subvolume<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        debug!("Executing: {} subvolume {:?}", self.binary.display(), args);

        let output = Command::new(&self.binary)
            .arg("subvolume")
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                Error::StorageFault(format!("Failed to run {}: {}", self.binary.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::StorageFault(format!(
                "btrfs subvolume {} failed: {}",
                args.first().map(|a| a.to_string_lossy()).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl SnapshotBackend for Btrfs {
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<()> {
        self.subvolume([OsStr::new("snapshot"), source.as_os_str(), dest.as_os_str()])?;
        Ok(())
    }

    fn delete(&self, subvolume: &Path) -> Result<()> {
        self.subvolume([OsStr::new("delete"), subvolume.as_os_str()])?;
        Ok(())
    }

    fn subvolume_id(&self, subvolume: &Path) -> Result<u64> {
        let output = self.subvolume([OsStr::new("show"), subvolume.as_os_str()])?;
        parse_subvolume_id(&output).ok_or_else(|| {
            Error::StorageFault(format!(
                "Could not resolve subvolume ID for {}",
                subvolume.display()
            ))
        })
    }

    fn default_subvolume(&self, mount_root: &Path) -> Result<DefaultSubvolume> {
        let output = self.subvolume([OsStr::new("get-default"), mount_root.as_os_str()])?;
        parse_default_subvolume(&output).ok_or_else(|| {
            Error::StorageFault(format!(
                "Unrecognized get-default output: {}",
                output.trim()
            ))
        })
    }

    fn set_default(&self, id: u64, mount_root: &Path) -> Result<()> {
        let id = id.to_string();
        self.subvolume([
            OsStr::new("set-default"),
            OsStr::new(&id),
            mount_root.as_os_str(),
        ])?;
        Ok(())
    }
}

/// Extract `Subvolume ID:` from `btrfs subvolume show` output
pub fn parse_subvolume_id(output: &str) -> Option<u64> {
    output.lines().find_map(|line| {
        line.trim()
            .strip_prefix("Subvolume ID:")
            .and_then(|rest| rest.trim().parse().ok())
    })
}

/// Parse `btrfs subvolume get-default` output.
///
/// Either `ID 256 gen 1234 top level 5 path @` or, for the top-level
/// subvolume, `ID 5 (FS_TREE)`.
pub fn parse_default_subvolume(output: &str) -> Option<DefaultSubvolume> {
    let line = output.lines().find(|l| l.trim_start().starts_with("ID "))?;
    let mut fields = line.split_whitespace();
    fields.next()?;
    let id = fields.next()?.parse().ok()?;

    let path = match line.find(" path ") {
        Some(idx) => PathBuf::from(line[idx + " path ".len()..].trim()),
        None => PathBuf::new(),
    };
    Some(DefaultSubvolume { id, path })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_OUTPUT: &str = "var/lib/legendary/snapshots/20250301120000/@
	Name: 			@
	UUID: 			0b1c7b2e-8d8f-4f5a-9f39-8f8f1f1b9a11
	Parent UUID: 		-
	Creation time: 		2025-03-01 12:00:00 +0000
	Subvolume ID: 		312
	Generation: 		4121
	Gen at creation: 	4100
	Parent ID: 		5
	Top level ID: 		5
";

    #[test]
    fn test_parse_subvolume_id() {
        assert_eq!(parse_subvolume_id(SHOW_OUTPUT), Some(312));
    }

    #[test]
    fn test_parse_subvolume_id_missing() {
        assert_eq!(parse_subvolume_id("ERROR: not a subvolume\n"), None);
    }

    #[test]
    fn test_parse_default_with_path() {
        let parsed = parse_default_subvolume(
            "ID 312 gen 4121 top level 5 path var/lib/legendary/snapshots/20250301120000/@\n",
        )
        .unwrap();
        assert_eq!(parsed.id, 312);
        assert_eq!(
            parsed.path,
            PathBuf::from("var/lib/legendary/snapshots/20250301120000/@")
        );
    }

    #[test]
    fn test_parse_default_top_level() {
        let parsed = parse_default_subvolume("ID 5 (FS_TREE)\n").unwrap();
        assert_eq!(parsed.id, 5);
        assert_eq!(parsed.path, PathBuf::new());
    }

    #[test]
    fn test_parse_default_garbage() {
        assert!(parse_default_subvolume("something else").is_none());
    }
}
