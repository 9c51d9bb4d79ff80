use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use tokio::task::JoinError;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::core::hardware::VolumeSource;
use crate::core::models::{CandidateFile, SessionSummary, Volume};
use crate::core::monitor::DeviceMonitor;
use crate::core::scanner::ContentScanner;
use crate::core::session::TransferSession;
use crate::core::share::ShareConnector;

/// The agent loop: poll for cards, then copy each new card in turn.
pub struct Orchestrator {
    ctx: AppContext,
    monitor: Arc<Mutex<DeviceMonitor>>,
    scanner: ContentScanner,
    session: TransferSession,
}

impl Orchestrator {
    pub fn new(
        ctx: AppContext,
        sources: Vec<Box<dyn VolumeSource>>,
        connector: Arc<dyn ShareConnector>,
    ) -> Self {
        let scanner = ContentScanner::from_config(&ctx.config.monitoring);
        let monitor = DeviceMonitor::new(sources, scanner.clone());
        let session = TransferSession::new(connector, &ctx.config, ctx.cancel.clone());

        Self {
            ctx,
            monitor: Arc::new(Mutex::new(monitor)),
            scanner,
            session,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let config = &self.ctx.config;
        let cancel = &self.ctx.cancel;

        info!(
            server = %config.smb.server,
            share = %config.smb.share,
            remote_base = %config.paths.remote_base_path,
            poll_interval = config.monitoring.poll_interval,
            "Pickly agent starting"
        );

        if config.monitoring.supported_extensions.is_empty() {
            warn!("No supported extensions configured, no card will ever qualify");
        }

        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "Poll cycle failed");
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(config.monitoring.poll_interval()) => {}
            }
        }

        info!("Pickly agent stopped");
        Ok(())
    }

    /// One poll: scan for new volumes and transfer each in order.
    pub async fn run_cycle(&self) -> Result<Vec<SessionSummary>> {
        let monitor = Arc::clone(&self.monitor);
        let volumes = tokio::task::spawn_blocking(move || {
            monitor
                .lock()
                .map(|mut monitor| monitor.scan())
                .map_err(|_| anyhow!("device monitor lock poisoned"))
        })
        .await
        .context("Volume scan task failed")??;

        let mut summaries = Vec::new();
        for volume in volumes {
            if self.ctx.cancel.is_cancelled() {
                warn!(volume = %volume.path().display(), "Shutdown requested, skipping volume");
                break;
            }

            if let Some(summary) = self.process_volume(&volume).await {
                summaries.push(summary);
            }
        }

        Ok(summaries)
    }

    /// Failures are logged; they never stop the remaining volumes.
    async fn process_volume(&self, volume: &Volume) -> Option<SessionSummary> {
        let scanner = self.scanner.clone();
        let root = volume.path().to_path_buf();
        let listing = tokio::task::spawn_blocking(move || scanner.list_qualifying_files(&root)).await;
        let files = listed_files(volume, listing)?;

        if files.is_empty() {
            debug!(volume = %volume.path().display(), "No files to transfer");
            return None;
        }

        info!(
            volume = %volume.path().display(),
            files = files.len(),
            "Starting transfer"
        );

        match self.session.transfer_volume(&files, volume).await {
            Ok(summary) => {
                if summary.failed > 0 {
                    warn!(
                        volume = %volume.path().display(),
                        failed = summary.failed,
                        "Some files were not transferred"
                    );
                }
                Some(summary)
            }
            Err(e) => {
                error!(volume = %volume.path().display(), error = %e, "Transfer session failed");
                None
            }
        }
    }
}

/// A listing task that died skips only its own volume.
fn listed_files(
    volume: &Volume,
    listing: Result<Vec<CandidateFile>, JoinError>,
) -> Option<Vec<CandidateFile>> {
    match listing {
        Ok(files) => Some(files),
        Err(e) => {
            error!(volume = %volume.path().display(), error = %e, "File listing task failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_failed_listing_skips_volume() {
        let listing = tokio::task::spawn_blocking(|| -> Vec<CandidateFile> {
            panic!("card pulled mid-scan")
        })
        .await;

        assert!(listed_files(&Volume::new("/media/pi/CARD1"), listing).is_none());
    }

    #[test]
    fn test_listing_passes_files_through() {
        let files = vec![CandidateFile {
            path: PathBuf::from("/media/pi/CARD1/a.JPG"),
            size: 10,
        }];

        assert_eq!(
            listed_files(&Volume::new("/media/pi/CARD1"), Ok(files.clone())),
            Some(files)
        );
    }
}
