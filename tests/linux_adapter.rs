//! Linux volume sources driven by a fake mount table, so no root or real
//! removable media is needed.

#![cfg(target_os = "linux")]

use std::fs;
use std::path::Path;

use pickly_agent::adapters::{MountBaseSource, PartitionTableSource, is_mount_point};
use pickly_agent::core::hardware::VolumeSource;
use pickly_agent::core::{ContentScanner, DeviceMonitor, Volume};
use tempfile::{TempDir, tempdir};

fn card_with_photo() -> TempDir {
    let card = tempdir().unwrap();
    fs::create_dir_all(card.path().join("DCIM/100NIKON")).unwrap();
    let photo = fs::File::create(card.path().join("DCIM/100NIKON/DSC_0001.NEF")).unwrap();
    photo.set_len(4_000_000).unwrap();
    card
}

fn mount_table(dir: &Path, lines: &[String]) -> std::path::PathBuf {
    let path = dir.join("mounts");
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

#[test]
fn test_card_in_mount_table_is_detected() {
    let card = card_with_photo();
    let fixtures = tempdir().unwrap();
    let mounts = mount_table(
        fixtures.path(),
        &[
            "/dev/mmcblk0p2 / ext4 rw,noatime 0 0".to_string(),
            format!("/dev/sda1 {} vfat rw,nosuid,nodev 0 0", card.path().display()),
        ],
    );

    let source = PartitionTableSource::new(&mounts, fixtures.path().join("sys"));
    let mut monitor = DeviceMonitor::new(
        vec![Box::new(source)],
        ContentScanner::new([".nef"], 1_000_000),
    );

    assert_eq!(monitor.scan(), vec![Volume::new(card.path())]);
    assert!(monitor.scan().is_empty());
}

#[test]
fn test_card_removed_from_table_is_forgotten() {
    let card = card_with_photo();
    let fixtures = tempdir().unwrap();
    let entry = format!("/dev/sdb1 {} exfat rw 0 0", card.path().display());
    let mounts = mount_table(fixtures.path(), &[entry.clone()]);

    let source = PartitionTableSource::new(&mounts, fixtures.path().join("sys"));
    let mut monitor = DeviceMonitor::new(
        vec![Box::new(source)],
        ContentScanner::new([".nef"], 1_000_000),
    );
    assert_eq!(monitor.scan().len(), 1);

    fs::write(&mounts, "").unwrap();
    assert!(monitor.scan().is_empty());
    assert!(monitor.processed().is_empty());

    fs::write(&mounts, entry).unwrap();
    assert_eq!(monitor.scan().len(), 1);
}

#[test]
fn test_missing_mount_table_does_not_hide_other_source() {
    let fixtures = tempdir().unwrap();
    let broken = PartitionTableSource::new(fixtures.path().join("missing"), fixtures.path());
    let empty_base = MountBaseSource::new(fixtures.path());

    assert!(broken.mounted_volumes().is_err());

    let monitor = DeviceMonitor::new(
        vec![Box::new(broken), Box::new(empty_base)],
        ContentScanner::new([".jpg"], 1),
    );
    assert!(monitor.mounted_volumes().is_empty());
}

#[test]
fn test_plain_directory_is_not_a_mount_point() {
    let dir = tempdir().unwrap();
    fs::create_dir(dir.path().join("CARD")).unwrap();
    assert!(!is_mount_point(&dir.path().join("CARD")));
    assert!(!is_mount_point(&dir.path().join("missing")));
}
