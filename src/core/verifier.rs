use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::core::share::{CreateDisposition, FileKind, RemoteShare, ShareError};
use crate::core::transfer_engine::TransferError;

/// Result of a successful verification
#[derive(Debug, PartialEq, Eq)]
pub struct VerifyResult {
    pub bytes_verified: u64,
    pub checksum: String,
}

/// Running SHA-256 over bytes as they stream past.
#[derive(Default)]
pub struct StreamingHasher {
    hasher: Sha256,
}

impl StreamingHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Hex-encoded digest
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Read the remote file back from offset 0 and hash it.
///
/// The handle is closed whether or not the read-back succeeds.
pub async fn hash_remote(
    share: &dyn RemoteShare,
    remote_path: &str,
    chunk_size: usize,
) -> Result<(String, u64), ShareError> {
    let handle = share
        .create_file(remote_path, CreateDisposition::Open, FileKind::File)
        .await?;

    let mut hasher = StreamingHasher::new();
    let mut offset: u64 = 0;

    let read_result = async {
        loop {
            let chunk = share.read(handle, chunk_size, offset).await?;
            if chunk.is_empty() {
                break;
            }
            hasher.update(&chunk);
            offset += chunk.len() as u64;
        }
        Ok::<(), ShareError>(())
    }
    .await;

    let close_result = share.close(handle).await;
    read_result?;
    close_result?;

    Ok((hasher.finish(), offset))
}

/// Verify the remote copy at `remote_path` against the checksum computed
/// while the local file was read.
pub async fn verify_remote(
    share: &dyn RemoteShare,
    remote_path: &str,
    expected: &str,
    chunk_size: usize,
) -> Result<VerifyResult, TransferError> {
    debug!(remote = %remote_path, "Starting checksum verification");

    let (actual, bytes_verified) = hash_remote(share, remote_path, chunk_size).await?;

    if actual != expected {
        info!(
            remote = %remote_path,
            expected = %expected,
            actual = %actual,
            "Checksum mismatch"
        );
        return Err(TransferError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!(remote = %remote_path, bytes_verified, "Verification complete");

    Ok(VerifyResult {
        bytes_verified,
        checksum: actual,
    })
}
