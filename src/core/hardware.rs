use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

/// Device path prefixes typical for SD cards and USB readers.
const REMOVABLE_DEVICE_PREFIXES: &[&str] = &["/dev/sd", "/dev/mmcblk"];

/// Mount points that belong to the host itself, even when they live on an
/// `mmcblk` device (a Pi boots from one).
const SYSTEM_MOUNT_POINTS: &[&str] = &["/", "/boot", "/boot/firmware", "/usr", "/var", "/home"];

/// One independent way of enumerating mounted volumes.
pub trait VolumeSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mount paths of volumes that are currently mounted.
    fn mounted_volumes(&self) -> anyhow::Result<Vec<PathBuf>>;
}

/// A row of the OS mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedPartition {
    pub device: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub options: Vec<String>,
}

impl MountedPartition {
    /// Mount-option and device-path heuristics for removable media.
    pub fn looks_removable(&self) -> bool {
        if self.options.iter().any(|opt| opt == "removable") {
            return true;
        }

        REMOVABLE_DEVICE_PREFIXES
            .iter()
            .any(|prefix| self.device.starts_with(prefix))
    }

    pub fn is_system_mount(&self) -> bool {
        is_system_mount_point(&self.mount_point)
    }

    /// Kernel block device name, e.g. `sdb1` for `/dev/sdb1`.
    pub fn block_name(&self) -> Option<&str> {
        self.device.strip_prefix("/dev/")
    }
}

pub fn is_system_mount_point(path: &Path) -> bool {
    SYSTEM_MOUNT_POINTS.iter().any(|p| path == Path::new(p))
}

/// Check if an I/O error indicates the device has been removed
pub fn is_device_removed_error(error: &io::Error) -> bool {
    match error.kind() {
        ErrorKind::NotFound => true,
        ErrorKind::PermissionDenied => false,
        ErrorKind::BrokenPipe => true,
        ErrorKind::NotConnected => true,
        _ => {
            if let Some(os_error) = error.raw_os_error() {
                matches!(
                    os_error,
                    libc::EIO | libc::ENODEV | libc::ENXIO | libc::ENOMEDIUM | libc::EMEDIUMTYPE
                )
            } else {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(device: &str, mount_point: &str, options: &[&str]) -> MountedPartition {
        MountedPartition {
            device: device.to_string(),
            mount_point: PathBuf::from(mount_point),
            fs_type: "vfat".to_string(),
            options: options.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_sd_device_is_removable() {
        assert!(partition("/dev/sdb1", "/media/pi/CARD", &["rw"]).looks_removable());
        assert!(partition("/dev/mmcblk1p1", "/media/pi/CARD", &["rw"]).looks_removable());
    }

    #[test]
    fn test_removable_option() {
        assert!(partition("/dev/nvme0n1p1", "/mnt/x", &["rw", "removable"]).looks_removable());
    }

    #[test]
    fn test_fixed_device_is_not_removable() {
        assert!(!partition("/dev/nvme0n1p2", "/data", &["rw", "relatime"]).looks_removable());
        assert!(!partition("tmpfs", "/run", &["rw"]).looks_removable());
    }

    #[test]
    fn test_root_is_system_mount() {
        assert!(partition("/dev/mmcblk0p2", "/", &["rw"]).is_system_mount());
        assert!(partition("/dev/mmcblk0p1", "/boot/firmware", &["rw"]).is_system_mount());
        assert!(!partition("/dev/sda1", "/media/pi/CARD", &["rw"]).is_system_mount());
    }

    #[test]
    fn test_block_name() {
        assert_eq!(partition("/dev/sdb1", "/x", &[]).block_name(), Some("sdb1"));
        assert_eq!(partition("tmpfs", "/x", &[]).block_name(), None);
    }

    #[test]
    fn test_is_device_removed_error_eio() {
        let error = io::Error::from_raw_os_error(libc::EIO);
        assert!(is_device_removed_error(&error));
    }

    #[test]
    fn test_is_device_removed_error_permission_denied() {
        let error = io::Error::new(ErrorKind::PermissionDenied, "permission denied");
        assert!(!is_device_removed_error(&error));
    }
}
