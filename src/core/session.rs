//! One volume pass against the remote share.
//!
//! A session opens a single connection, creates a fresh timestamped
//! directory under the remote base and copies every candidate file into it.
//! The connection is released on every exit path.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{AppConfig, SmbConfig};
use crate::core::models::{CandidateFile, SessionSummary, Volume};
use crate::core::share::{
    CreateDisposition, FileKind, RemoteShare, ShareConnector, ShareError, join_remote,
};
use crate::core::transfer_engine::ChunkedTransferEngine;

const SESSION_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to connect to {server}:{port}: {source}")]
    Connect {
        server: String,
        port: u16,
        #[source]
        source: ShareError,
    },

    #[error("Authentication as {username} failed: {source}")]
    Authenticate {
        username: String,
        #[source]
        source: ShareError,
    },

    #[error("Failed to attach share {share}: {source}")]
    Attach {
        share: String,
        #[source]
        source: ShareError,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: ShareError,
    },
}

/// `{remote_base}/{YYYYmmdd_HHMMSS}_{volume base name}`
pub fn session_directory(remote_base: &str, volume: &Volume, now: NaiveDateTime) -> String {
    join_remote(
        remote_base,
        &format!(
            "{}_{}",
            now.format(SESSION_TIMESTAMP_FORMAT),
            volume.base_name()
        ),
    )
}

/// Remote file names for `files`, unique within the set. A name that occurs
/// more than once on the card (one per camera folder) gets its parent folder
/// as a prefix; any name still taken gets a numeric suffix.
pub fn remote_names(files: &[CandidateFile]) -> Vec<String> {
    let base_name = |file: &CandidateFile| {
        file.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        *counts.entry(base_name(file)).or_default() += 1;
    }
    let is_unique = |name: &str| counts.get(name).copied().unwrap_or(0) < 2;

    // Unique base names keep their name; reserve them before anything is
    // renamed into their place.
    let mut taken: HashSet<String> = files
        .iter()
        .map(base_name)
        .filter(|name| is_unique(name.as_str()))
        .collect();

    files
        .iter()
        .map(|file| {
            let name = base_name(file);
            if is_unique(name.as_str()) {
                return name;
            }

            let prefixed = match file.path.parent().and_then(|p| p.file_name()) {
                Some(parent) => format!("{}_{}", parent.to_string_lossy(), name),
                None => name,
            };

            let mut candidate = prefixed.clone();
            let mut n = 2;
            while !taken.insert(candidate.clone()) {
                candidate = with_suffix(&prefixed, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// `IMG_0001.JPG`, 2 -> `IMG_0001_2.JPG`
fn with_suffix(name: &str, n: usize) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, n, ext),
        _ => format!("{}_{}", name, n),
    }
}

pub struct TransferSession {
    connector: Arc<dyn ShareConnector>,
    smb: SmbConfig,
    remote_base: String,
    engine: ChunkedTransferEngine,
    cancel: CancellationToken,
}

impl TransferSession {
    pub fn new(
        connector: Arc<dyn ShareConnector>,
        config: &AppConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self::with_engine(
            connector,
            config.smb.clone(),
            config.paths.remote_base_path.clone(),
            ChunkedTransferEngine::new(&config.transfer, cancel.clone()),
            cancel,
        )
    }

    pub fn with_engine(
        connector: Arc<dyn ShareConnector>,
        smb: SmbConfig,
        remote_base: String,
        engine: ChunkedTransferEngine,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            connector,
            smb,
            remote_base,
            engine,
            cancel,
        }
    }

    pub async fn transfer_volume(
        &self,
        files: &[CandidateFile],
        volume: &Volume,
    ) -> Result<SessionSummary, SessionError> {
        self.transfer_volume_at(files, volume, Local::now().naive_local())
            .await
    }

    /// Same as [`transfer_volume`](Self::transfer_volume) with a fixed clock.
    pub async fn transfer_volume_at(
        &self,
        files: &[CandidateFile],
        volume: &Volume,
        now: NaiveDateTime,
    ) -> Result<SessionSummary, SessionError> {
        let remote_dir = session_directory(&self.remote_base, volume, now);
        let span = info_span!("session", volume = %volume.path().display(), remote = %remote_dir);

        async {
            let share = self.open_share().await?;
            let result = self.run(share.as_ref(), files, remote_dir).await;
            release(share).await;
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        share: &dyn RemoteShare,
        files: &[CandidateFile],
        remote_dir: String,
    ) -> Result<SessionSummary, SessionError> {
        create_directory_tree(share, &remote_dir).await?;
        info!(files = files.len(), "Session directory ready");

        let mut summary = SessionSummary {
            remote_dir: remote_dir.clone(),
            ..Default::default()
        };

        for (file, name) in files.iter().zip(remote_names(files)) {
            if self.cancel.is_cancelled() {
                warn!(
                    remaining = files.len() - summary.attempted,
                    "Shutdown requested, stopping before next file"
                );
                break;
            }

            let remote_path = join_remote(&remote_dir, &name);
            let outcome = self
                .engine
                .transfer_to(share, &file.path, &remote_path)
                .await;
            summary.record(&outcome);
        }

        info!(
            succeeded = summary.succeeded,
            attempted = summary.attempted,
            duplicates = summary.duplicates,
            failed = summary.failed,
            bytes = summary.bytes_copied,
            "Transferred {}/{} files",
            summary.succeeded,
            summary.attempted
        );

        Ok(summary)
    }

    /// Connect, authenticate and attach. The connection is released if any
    /// step after connect fails.
    pub async fn open_share(&self) -> Result<Box<dyn RemoteShare>, SessionError> {
        let smb = &self.smb;
        debug!(server = %smb.server, port = smb.port, share = %smb.share, "Opening share");

        let mut conn = self
            .connector
            .connect(&smb.server, smb.port)
            .await
            .map_err(|source| SessionError::Connect {
                server: smb.server.clone(),
                port: smb.port,
                source,
            })?;

        if let Err(source) = conn
            .authenticate(&smb.username, &smb.password, &smb.domain)
            .await
        {
            if let Err(e) = conn.disconnect().await {
                warn!(error = %e, "Failed to release connection after logon failure");
            }
            return Err(SessionError::Authenticate {
                username: smb.username.clone(),
                source,
            });
        }

        conn.attach_share(&smb.share)
            .await
            .map_err(|source| SessionError::Attach {
                share: smb.share.clone(),
                source,
            })
    }

    /// Open the share and look up the remote base, then disconnect.
    pub async fn check_connection(&self) -> Result<(), SessionError> {
        let share = self.open_share().await?;

        match share
            .create_file(&self.remote_base, CreateDisposition::Open, FileKind::Directory)
            .await
        {
            Ok(handle) => {
                if let Err(e) = share.close(handle).await {
                    warn!(error = %e, "Failed to close remote base handle");
                }
                info!(remote_base = %self.remote_base, "Remote base directory is reachable");
            }
            Err(e) if e.is_not_found() => {
                info!(remote_base = %self.remote_base, "Remote base directory will be created on first transfer");
            }
            Err(e) => warn!(remote_base = %self.remote_base, error = %e, "Could not open remote base directory"),
        }

        release(share).await;
        Ok(())
    }
}

async fn release(share: Box<dyn RemoteShare>) {
    if let Err(e) = share.disconnect().await {
        warn!(error = %e, "Failed to disconnect from share");
    }
}

/// Create `path` and any missing ancestors. An existing directory is fine.
async fn create_directory_tree(share: &dyn RemoteShare, path: &str) -> Result<(), SessionError> {
    let mut current = String::new();

    for part in path.split('/').filter(|p| !p.is_empty()) {
        current.push('/');
        current.push_str(part);

        match share
            .create_file(&current, CreateDisposition::Create, FileKind::Directory)
            .await
        {
            Ok(handle) => {
                debug!(path = %current, "Created directory");
                if let Err(e) = share.close(handle).await {
                    warn!(path = %current, error = %e, "Failed to close directory handle");
                }
            }
            Err(e) if e.is_already_exists() => {
                debug!(path = %current, "Directory already exists");
            }
            Err(source) => {
                error!(path = %current, error = %source, "Failed to create directory");
                return Err(SessionError::CreateDirectory {
                    path: current,
                    source,
                });
            }
        }
    }

    Ok(())
}
