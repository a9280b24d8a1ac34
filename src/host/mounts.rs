// src/host/mounts.rs

//! Bind mounts via mount(2), mount table from /proc/self/mountinfo

use super::MountTable;
use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// The real kernel mount table
#[derive(Debug, Clone, Default)]
pub struct LinuxMounts;

impl LinuxMounts {
    pub fn new() -> Self {
        Self
    }
}

impl MountTable for LinuxMounts {
    fn bind(&self, source: &Path, target: &Path) -> Result<()> {
        debug!("Bind mount {} -> {}", source.display(), target.display());
        mount::<Path, Path, str, str>(Some(source), target, None, MsFlags::MS_BIND, None).map_err(
            |e| {
                Error::MountFault(format!(
                    "bind mount {} -> {} failed: {}",
                    source.display(),
                    target.display(),
                    e
                ))
            },
        )
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        debug!("Unmount {}", target.display());
        match umount2(target, MntFlags::UMOUNT_NOFOLLOW) {
            Ok(()) => Ok(()),
            // EINVAL: not a mount point. ENOENT: target vanished.
            Err(Errno::EINVAL) | Err(Errno::ENOENT) if !self.is_mounted(target)? => {
                debug!("{} already unmounted", target.display());
                Ok(())
            }
            Err(e) => Err(Error::MountFault(format!(
                "unmount {} failed: {}",
                target.display(),
                e
            ))),
        }
    }

    fn is_mounted(&self, target: &Path) -> Result<bool> {
        let content = fs::read_to_string(MOUNTINFO)
            .map_err(|e| Error::MountFault(format!("Failed to read {}: {}", MOUNTINFO, e)))?;
        let target = resolve_mount_point(target);
        Ok(parse_mount_points(&content).iter().any(|p| *p == target))
    }
}

/// Absolute form of `target` as the kernel lists it.
///
/// Only the parent directory is canonicalized. The last component stays as
/// written, so a symlink inside a snapshot never resolves to a host path.
fn resolve_mount_point(target: &Path) -> PathBuf {
    match (target.parent(), target.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or_else(|_| target.to_path_buf()),
        _ => target.to_path_buf(),
    }
}

/// Mount points listed in mountinfo content, octal escapes decoded
pub fn parse_mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Decode the `\040`-style escapes the kernel uses for space, tab, newline and backslash
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOUNTINFO_SAMPLE: &str = "\
22 1 0:21 /@ / rw,relatime shared:1 - btrfs /dev/nvme0n1p2 rw,subvol=/@
23 22 0:5 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
91 22 0:5 / /var/lib/legendary/snapshots/20250301120000/@/proc rw shared:12 - proc proc rw
92 22 0:25 /data /mnt/my\\040disk rw shared:40 - ext4 /dev/sdb1 rw
";

    #[test]
    fn test_parse_mount_points() {
        let points = parse_mount_points(MOUNTINFO_SAMPLE);
        assert_eq!(points.len(), 4);
        assert_eq!(points[0], PathBuf::from("/"));
        assert_eq!(
            points[2],
            PathBuf::from("/var/lib/legendary/snapshots/20250301120000/@/proc")
        );
    }

    #[test]
    fn test_parse_mount_points_unescapes_spaces() {
        let points = parse_mount_points(MOUNTINFO_SAMPLE);
        assert_eq!(points[3], PathBuf::from("/mnt/my disk"));
    }

    #[test]
    fn test_resolve_mount_point_keeps_final_symlink() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let etc = temp_dir.path().join("@/etc");
        fs::create_dir_all(&etc).unwrap();
        let link = etc.join("resolv.conf");
        std::os::unix::fs::symlink("/proc", &link).unwrap();

        let resolved = resolve_mount_point(&link);
        assert_eq!(resolved, fs::canonicalize(&etc).unwrap().join("resolv.conf"));
        assert_ne!(resolved, PathBuf::from("/proc"));
    }

    #[test]
    fn test_resolve_mount_point_follows_parent_links() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let real = temp_dir.path().join("real");
        fs::create_dir_all(real.join("proc")).unwrap();
        std::os::unix::fs::symlink(&real, temp_dir.path().join("alias")).unwrap();

        let resolved = resolve_mount_point(&temp_dir.path().join("alias/proc"));
        assert_eq!(resolved, fs::canonicalize(&real).unwrap().join("proc"));
    }

    #[test]
    fn test_unescape_leaves_plain_backslash() {
        assert_eq!(unescape_octal("a\\b"), "a\\b");
        assert_eq!(unescape_octal("tail\\04"), "tail\\04");
    }
}
