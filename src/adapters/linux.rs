use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::stat::{lstat, stat};
use tracing::{debug, warn};

use crate::core::hardware::{MountedPartition, VolumeSource};

const PROC_MOUNTS: &str = "/proc/self/mounts";
const SYS_CLASS_BLOCK: &str = "/sys/class/block";

/// Directories directly under the configured mount base (e.g. `/media/pi`)
/// that are mount points.
pub struct MountBaseSource {
    base: PathBuf,
}

impl MountBaseSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

impl VolumeSource for MountBaseSource {
    fn name(&self) -> &'static str {
        "mount-base"
    }

    fn mounted_volumes(&self) -> Result<Vec<PathBuf>> {
        if !self.base.exists() {
            debug!(base = %self.base.display(), "Mount base does not exist");
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.base)
            .with_context(|| format!("Failed to list {}", self.base.display()))?;

        Ok(mount_points(entries, &self.base))
    }
}

/// Mount points among `entries`. An unreadable entry is skipped.
fn mount_points(
    entries: impl Iterator<Item = std::io::Result<fs::DirEntry>>,
    base: &Path,
) -> Vec<PathBuf> {
    entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                warn!(base = %base.display(), error = %e, "Skipping unreadable mount base entry");
                None
            }
        })
        .filter(|path| is_mount_point(path))
        .collect()
}

/// Entries of the kernel mount table that look like removable media.
pub struct PartitionTableSource {
    mounts_file: PathBuf,
    sys_block: PathBuf,
}

impl Default for PartitionTableSource {
    fn default() -> Self {
        Self::new(PROC_MOUNTS, SYS_CLASS_BLOCK)
    }
}

impl PartitionTableSource {
    pub fn new(mounts_file: impl Into<PathBuf>, sys_block: impl Into<PathBuf>) -> Self {
        Self {
            mounts_file: mounts_file.into(),
            sys_block: sys_block.into(),
        }
    }

    /// The kernel's `removable` flag lives on the whole disk, so a partition
    /// falls back to its parent entry.
    fn sysfs_removable(&self, block_name: &str) -> bool {
        let own = self.sys_block.join(block_name).join("removable");
        let parent = self.sys_block.join(block_name).join("..").join("removable");

        [own, parent].iter().any(|flag| {
            fs::read_to_string(flag)
                .map(|value| value.trim() == "1")
                .unwrap_or(false)
        })
    }

    fn is_removable(&self, partition: &MountedPartition) -> bool {
        if partition.is_system_mount() {
            return false;
        }
        partition.looks_removable()
            || partition
                .block_name()
                .is_some_and(|name| self.sysfs_removable(name))
    }
}

impl VolumeSource for PartitionTableSource {
    fn name(&self) -> &'static str {
        "partition-table"
    }

    fn mounted_volumes(&self) -> Result<Vec<PathBuf>> {
        let table = fs::read_to_string(&self.mounts_file)
            .with_context(|| format!("Failed to read {}", self.mounts_file.display()))?;

        Ok(parse_mounts(&table)
            .into_iter()
            .filter(|partition| self.is_removable(partition))
            .map(|partition| partition.mount_point)
            .collect())
    }
}

/// Parse `/proc/self/mounts` (fstab format). Malformed lines are skipped.
pub fn parse_mounts(input: &str) -> Vec<MountedPartition> {
    input
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next()?;

            Some(MountedPartition {
                device: unescape_mount_field(device),
                mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                fs_type: fs_type.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Decode the kernel's octal escapes (`\040` for a space).
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4].iter().all(u8::is_ascii_digit)
        {
            if let Ok(num) = u8::from_str_radix(&value[index + 1..index + 4], 8) {
                output.push(num);
                index += 4;
                continue;
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Same test as `os.path.ismount`: a directory is a mount point when it sits
/// on a different device than its parent, or is its own parent.
pub fn is_mount_point(path: &Path) -> bool {
    let Ok(own) = lstat(path) else {
        return false;
    };
    if own.st_mode & libc::S_IFMT != libc::S_IFDIR {
        return false;
    }
    let Ok(parent) = stat(&path.join("..")) else {
        return false;
    };

    own.st_dev != parent.st_dev || own.st_ino == parent.st_ino
}
