use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::TransferError;
use crate::config::TransferConfig;
use crate::core::hardware::is_device_removed_error;
use crate::core::models::{FileOutcome, TransferStatus};
use crate::core::retry::RetryPolicy;
use crate::core::share::{CreateDisposition, FileHandle, FileKind, RemoteShare, join_remote};
use crate::core::verifier::{self, StreamingHasher};
use crate::logging::LogThrottle;

/// Files larger than this get progress log lines.
pub const PROGRESS_THRESHOLD: u64 = 10 * 1024 * 1024;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

enum AttemptOutcome {
    Duplicate { size: u64 },
    Copied { bytes: u64 },
}

/// Copies one local file to one remote path.
///
/// Each attempt runs a duplicate check, a chunked write at cumulative
/// offsets and, when enabled, a SHA-256 read-back. Failed attempts are
/// retried per the [`RetryPolicy`]; exhausting it yields a failed
/// [`FileOutcome`] rather than an error.
///
/// When an attempt fails after the remote file was created, the partial file
/// is deleted before the next attempt so it can never pass the next
/// attempt's size-based duplicate check.
pub struct ChunkedTransferEngine {
    chunk_size: usize,
    verify_checksums: bool,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl ChunkedTransferEngine {
    pub fn new(config: &TransferConfig, cancel: CancellationToken) -> Self {
        Self::with_settings(
            config.chunk_size,
            config.verify_checksums,
            RetryPolicy::from_config(config),
            cancel,
        )
    }

    pub fn with_settings(
        chunk_size: usize,
        verify_checksums: bool,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            verify_checksums,
            retry,
            cancel,
        }
    }

    /// Transfer `local` into `remote_dir`, keeping its file name.
    pub async fn transfer_file(
        &self,
        share: &dyn RemoteShare,
        local: &Path,
        remote_dir: &str,
    ) -> FileOutcome {
        let Some(name) = local.file_name() else {
            error!(file = %local.display(), "Local path has no file name");
            return FileOutcome {
                status: TransferStatus::Failed,
                attempts: 0,
                bytes_copied: 0,
            };
        };

        let remote_path = join_remote(remote_dir, &name.to_string_lossy());
        self.transfer_to(share, local, &remote_path).await
    }

    /// Transfer `local` to the exact `remote_path`.
    pub async fn transfer_to(
        &self,
        share: &dyn RemoteShare,
        local: &Path,
        remote_path: &str,
    ) -> FileOutcome {
        let span = info_span!(
            "transfer_file",
            file = %local.display(),
            remote = %remote_path
        );

        async {
            let mut attempts: u32 = 0;
            // Set once an attempt has written the remote file; from then on
            // a size match proves nothing.
            let mut remote_written = false;

            loop {
                attempts += 1;
                let mut created = false;
                let started = Instant::now();

                match self
                    .attempt(share, local, remote_path, !remote_written, &mut created)
                    .await
                {
                    Ok(AttemptOutcome::Duplicate { size }) => {
                        info!(size, "File already exists with the same size, skipping");
                        return FileOutcome {
                            status: TransferStatus::Duplicate,
                            attempts,
                            bytes_copied: 0,
                        };
                    }
                    Ok(AttemptOutcome::Copied { bytes }) => {
                        let secs = started.elapsed().as_secs_f64();
                        let speed_mbps = if secs > 0.0 {
                            bytes as f64 / (1024.0 * 1024.0) / secs
                        } else {
                            0.0
                        };
                        info!(
                            bytes,
                            attempt = attempts,
                            speed_mbps = format!("{:.2}", speed_mbps),
                            "Transfer completed"
                        );
                        return FileOutcome {
                            status: TransferStatus::Success,
                            attempts,
                            bytes_copied: bytes,
                        };
                    }
                    Err(e) => {
                        if e.is_checksum_mismatch() {
                            warn!(attempt = attempts, error = %e, "Verification failed");
                        } else if let TransferError::LocalIo(io_err) = &e {
                            warn!(
                                attempt = attempts,
                                error = %e,
                                volume_removed = is_device_removed_error(io_err),
                                "Transfer attempt failed"
                            );
                        } else {
                            warn!(attempt = attempts, error = %e, "Transfer attempt failed");
                        }

                        if created {
                            remote_written = true;
                            self.discard_partial(share, remote_path).await;
                        }

                        if !self.retry.has_attempts_left(attempts) {
                            error!(attempts, "All transfer attempts failed");
                            return FileOutcome {
                                status: TransferStatus::Failed,
                                attempts,
                                bytes_copied: 0,
                            };
                        }

                        debug!(
                            status = TransferStatus::Waiting.as_str(),
                            delay_ms = self.retry.delay_after(attempts).as_millis() as u64,
                            "Waiting before next attempt"
                        );
                        if !self.retry.wait(attempts, &self.cancel).await {
                            warn!(attempts, "Retry wait interrupted by shutdown");
                            return FileOutcome {
                                status: TransferStatus::Failed,
                                attempts,
                                bytes_copied: 0,
                            };
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt(
        &self,
        share: &dyn RemoteShare,
        local: &Path,
        remote_path: &str,
        check_duplicate: bool,
        created: &mut bool,
    ) -> Result<AttemptOutcome, TransferError> {
        let local_size = tokio::fs::metadata(local)
            .await
            .map_err(TransferError::LocalIo)?
            .len();

        if check_duplicate && self.is_duplicate(share, remote_path, local_size).await {
            return Ok(AttemptOutcome::Duplicate { size: local_size });
        }

        let handle = share
            .create_file(remote_path, CreateDisposition::OverwriteIf, FileKind::File)
            .await?;
        *created = true;
        debug!(status = TransferStatus::Transferring.as_str(), size = local_size, "Writing");

        let written = self.write_chunks(share, handle, local, local_size).await;
        let closed = share.close(handle).await;
        let (bytes, checksum) = written?;
        closed?;

        if let Some(expected) = checksum {
            debug!(status = TransferStatus::Verifying.as_str(), "Reading back");
            verifier::verify_remote(share, remote_path, &expected, self.chunk_size).await?;
        }

        Ok(AttemptOutcome::Copied { bytes })
    }

    /// Size-only comparison: a different file of equal size is taken as a
    /// duplicate.
    async fn is_duplicate(&self, share: &dyn RemoteShare, remote_path: &str, local_size: u64) -> bool {
        let handle = match share
            .create_file(remote_path, CreateDisposition::Open, FileKind::File)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if !e.is_not_found() {
                    debug!(error = %e, "Duplicate check could not open remote file");
                }
                return false;
            }
        };

        let info = share.query_info(handle).await;
        if let Err(e) = share.close(handle).await {
            debug!(error = %e, "Failed to close handle after duplicate check");
        }

        match info {
            Ok(info) => !info.is_directory && info.size == local_size,
            Err(e) => {
                debug!(error = %e, "Duplicate check could not query remote file");
                false
            }
        }
    }

    /// Stream `local` to `handle`, each chunk at the cumulative offset of
    /// the chunks before it. Returns bytes written and, when verification is
    /// on, the hex SHA-256 of what was read.
    async fn write_chunks(
        &self,
        share: &dyn RemoteShare,
        handle: FileHandle,
        local: &Path,
        total_size: u64,
    ) -> Result<(u64, Option<String>), TransferError> {
        let mut file = File::open(local).await.map_err(TransferError::LocalIo)?;
        let mut buffer = vec![0u8; self.chunk_size];
        let mut hasher = self.verify_checksums.then(StreamingHasher::new);
        let mut offset: u64 = 0;

        let report_progress = total_size > PROGRESS_THRESHOLD;
        let throttle = LogThrottle::new(PROGRESS_LOG_INTERVAL);

        loop {
            let n = read_chunk(&mut file, &mut buffer)
                .await
                .map_err(TransferError::LocalIo)?;
            if n == 0 {
                break;
            }

            let chunk = &buffer[..n];
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            }

            let written = share.write(handle, chunk, offset).await?;
            if written != n {
                return Err(TransferError::ShortWrite {
                    offset,
                    expected: n,
                    written,
                });
            }
            offset += n as u64;

            if report_progress && throttle.should_log() {
                let percent = offset as f64 / total_size as f64 * 100.0;
                info!(
                    bytes_copied = offset,
                    total_bytes = total_size,
                    percent = format!("{:.1}", percent),
                    "Transfer progress"
                );
            }
        }

        Ok((offset, hasher.map(StreamingHasher::finish)))
    }

    async fn discard_partial(&self, share: &dyn RemoteShare, remote_path: &str) {
        match share.delete(remote_path).await {
            Ok(()) => debug!("Removed partial remote file"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(error = %e, "Failed to remove partial remote file"),
        }
    }
}

/// Fill `buf` from `file`, short only at end of file.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ShareController, SimulatedShare};
    use crate::core::share::RemoteShare;
    use std::fs;
    use tempfile::tempdir;

    fn engine(chunk_size: usize, verify: bool, attempts: u32) -> ChunkedTransferEngine {
        ChunkedTransferEngine::with_settings(
            chunk_size,
            verify,
            RetryPolicy::new(attempts, Duration::ZERO),
            CancellationToken::new(),
        )
    }

    async fn setup() -> (Box<dyn RemoteShare>, ShareController) {
        let (connector, controller) = SimulatedShare::new();
        controller.put_dir("/incoming");
        let share = connector.open_share().await.unwrap();
        (share, controller)
    }

    fn patterned(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[tokio::test]
    async fn test_chunk_offsets_are_cumulative() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        let content = patterned(10 * 1024 + 17);
        fs::write(&local, &content).unwrap();

        let (share, controller) = setup().await;
        let outcome = engine(4096, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(outcome.bytes_copied, content.len() as u64);

        let writes = controller.write_calls();
        let offsets: Vec<u64> = writes.iter().map(|w| w.offset).collect();
        assert_eq!(offsets, vec![0, 4096, 8192]);
        assert_eq!(writes[2].len, 1024 + 17);

        assert_eq!(controller.file("/incoming/a.JPG").unwrap(), content);
        assert_eq!(controller.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_skips_write() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, b"local content").unwrap();

        let (share, controller) = setup().await;
        // Same size, different bytes
        controller.put_file("/incoming/a.JPG", b"REMOTE_conten".to_vec());

        let outcome = engine(4, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Duplicate);
        assert!(outcome.succeeded());
        assert_eq!(outcome.bytes_copied, 0);
        assert!(controller.write_calls().is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_overwrites() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, b"local content").unwrap();

        let (share, controller) = setup().await;
        controller.put_file("/incoming/a.JPG", b"stale".to_vec());

        let outcome = engine(4, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(controller.file("/incoming/a.JPG").unwrap(), b"local content");
    }

    #[tokio::test]
    async fn test_corruption_is_retried_until_exhausted() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, patterned(100)).unwrap();

        let (share, controller) = setup().await;
        controller.corrupt_writes(true);

        let outcome = engine(32, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        // every attempt wrote all four chunks again
        assert_eq!(controller.write_calls().len(), 12);
        assert!(controller.file("/incoming/a.JPG").is_none());
        assert_eq!(controller.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_undeletable_corrupt_copy_is_rewritten() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        let content = patterned(100);
        fs::write(&local, &content).unwrap();

        let (share, controller) = setup().await;
        controller.corrupt_next_writes(1);
        controller.fail_deletes(true);

        let outcome = engine(32, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        // The corrupt full-size leftover must not pass as a duplicate
        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.bytes_copied, 100);
        assert_eq!(controller.write_calls().len(), 8);
        assert_eq!(controller.file("/incoming/a.JPG").unwrap(), content);
    }

    #[tokio::test]
    async fn test_persistent_corruption_fails_when_delete_fails() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, patterned(100)).unwrap();

        let (share, controller) = setup().await;
        controller.corrupt_writes(true);
        controller.fail_deletes(true);

        let outcome = engine(32, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(controller.write_calls().len(), 12);
    }

    #[tokio::test]
    async fn test_corruption_undetected_without_verification() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, patterned(100)).unwrap();

        let (share, controller) = setup().await;
        controller.corrupt_writes(true);

        let outcome = engine(32, false, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_transport_errors_exhaust_retries() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, b"data").unwrap();

        let (share, controller) = setup().await;
        controller.fail_all_writes(true);

        let outcome = engine(1024, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(controller.write_calls().len(), 3);
        assert_eq!(controller.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        let content = patterned(3000);
        fs::write(&local, &content).unwrap();

        let (share, controller) = setup().await;
        controller.fail_next_writes(2);

        let outcome = engine(1024, true, 3)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(controller.file("/incoming/a.JPG").unwrap(), content);
    }

    #[tokio::test]
    async fn test_missing_local_file_fails() {
        let temp = tempdir().unwrap();
        let (share, controller) = setup().await;

        let outcome = engine(1024, true, 2)
            .transfer_file(share.as_ref(), &temp.path().join("gone.JPG"), "/incoming")
            .await;

        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        assert!(controller.write_calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_file_is_created() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("empty.JPG");
        fs::write(&local, b"").unwrap();

        let (share, controller) = setup().await;
        let outcome = engine(1024, true, 1)
            .transfer_file(share.as_ref(), &local, "/incoming")
            .await;

        // A zero-byte remote file would already match; it does not exist yet
        assert_eq!(outcome.status, TransferStatus::Success);
        assert_eq!(controller.file("/incoming/empty.JPG").unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn test_cancel_stops_retry_wait() {
        let temp = tempdir().unwrap();
        let local = temp.path().join("a.JPG");
        fs::write(&local, b"data").unwrap();

        let (share, controller) = setup().await;
        controller.fail_all_writes(true);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let engine = ChunkedTransferEngine::with_settings(
            1024,
            true,
            RetryPolicy::new(5, Duration::from_secs(3600)),
            cancel,
        );

        let outcome = engine.transfer_file(share.as_ref(), &local, "/incoming").await;

        assert_eq!(outcome.status, TransferStatus::Failed);
        assert_eq!(outcome.attempts, 1);
    }
}
