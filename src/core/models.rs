use std::path::{Path, PathBuf};

/// A mounted removable volume, identified only by its mount path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Volume {
    pub mount_path: PathBuf,
}

impl Volume {
    pub fn new(mount_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_path: mount_path.into(),
        }
    }

    /// Last path component, used to name the remote session directory.
    pub fn base_name(&self) -> String {
        self.mount_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "volume".to_string())
    }

    pub fn path(&self) -> &Path {
        &self.mount_path
    }
}

/// A file that passed the extension and size filters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Waiting,
    Transferring,
    Verifying,
    Success,
    Duplicate,
    Failed,
}

impl TransferStatus {
    /// Value of the `status` field on transfer log events.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Transferring => "transferring",
            Self::Verifying => "verifying",
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
        }
    }
}

/// Final result of transferring one file, after all attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub status: TransferStatus,
    pub attempts: u32,
    pub bytes_copied: u64,
}

impl FileOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Success | TransferStatus::Duplicate
        )
    }
}

/// Aggregate of one volume pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub remote_dir: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub duplicates: usize,
    pub failed: usize,
    pub bytes_copied: u64,
}

impl SessionSummary {
    pub fn record(&mut self, outcome: &FileOutcome) {
        self.attempted += 1;
        self.bytes_copied += outcome.bytes_copied;
        match outcome.status {
            TransferStatus::Success => self.succeeded += 1,
            TransferStatus::Duplicate => {
                self.succeeded += 1;
                self.duplicates += 1;
            }
            _ => self.failed += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_base_name() {
        assert_eq!(Volume::new("/media/pi/CARD1").base_name(), "CARD1");
        assert_eq!(Volume::new("/media/pi/CARD1/").base_name(), "CARD1");
    }

    #[test]
    fn test_status_names() {
        assert_eq!(TransferStatus::Waiting.as_str(), "waiting");
        assert_eq!(TransferStatus::Transferring.as_str(), "transferring");
        assert_eq!(TransferStatus::Verifying.as_str(), "verifying");
        assert_eq!(TransferStatus::Duplicate.as_str(), "duplicate");
    }

    #[test]
    fn test_summary_counts_duplicates_as_success() {
        let mut summary = SessionSummary::default();
        summary.record(&FileOutcome {
            status: TransferStatus::Success,
            attempts: 1,
            bytes_copied: 10,
        });
        summary.record(&FileOutcome {
            status: TransferStatus::Duplicate,
            attempts: 1,
            bytes_copied: 0,
        });
        summary.record(&FileOutcome {
            status: TransferStatus::Failed,
            attempts: 3,
            bytes_copied: 0,
        });

        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.bytes_copied, 10);
    }
}
