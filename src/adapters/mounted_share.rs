//! Share backend for a share the kernel has already mounted (CIFS).
//!
//! The kernel owns the wire protocol and the credentials, so connect and
//! authenticate only check that the mount point is reachable. File handles
//! map onto `tokio::fs::File`.

use std::collections::HashMap;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Component, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::core::share::{
    CreateDisposition, FileHandle, FileKind, RemoteFileInfo, RemoteShare, ShareConnection,
    ShareConnector, ShareError, native_path,
};

pub struct MountedShareConnector {
    mount_point: PathBuf,
}

impl MountedShareConnector {
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }
}

#[async_trait]
impl ShareConnector for MountedShareConnector {
    async fn connect(
        &self,
        server: &str,
        port: u16,
    ) -> Result<Box<dyn ShareConnection>, ShareError> {
        let metadata = fs::metadata(&self.mount_point).await.map_err(|e| {
            ShareError::Connection(format!(
                "share for {}:{} is not mounted at {}: {}",
                server,
                port,
                self.mount_point.display(),
                e
            ))
        })?;

        if !metadata.is_dir() {
            return Err(ShareError::Connection(format!(
                "{} is not a directory",
                self.mount_point.display()
            )));
        }

        Ok(Box::new(MountedConnection {
            root: self.mount_point.clone(),
        }))
    }
}

struct MountedConnection {
    root: PathBuf,
}

#[async_trait]
impl ShareConnection for MountedConnection {
    async fn authenticate(
        &mut self,
        username: &str,
        _password: &str,
        _domain: &str,
    ) -> Result<(), ShareError> {
        debug!(username, "Credentials are held by the kernel mount");
        Ok(())
    }

    async fn attach_share(
        self: Box<Self>,
        share: &str,
    ) -> Result<Box<dyn RemoteShare>, ShareError> {
        info!(share, root = %self.root.display(), "Attached to mounted share");
        Ok(Box::new(MountedShare {
            root: self.root,
            handles: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), ShareError> {
        Ok(())
    }
}

enum OpenEntry {
    File(File),
    Directory,
}

struct MountedShare {
    root: PathBuf,
    handles: Mutex<HashMap<u64, OpenEntry>>,
    next_handle: AtomicU64,
}

impl MountedShare {
    /// Map a share path onto the mount, refusing anything that would escape it.
    fn resolve(&self, path: &str) -> Result<PathBuf, ShareError> {
        let native = native_path(path);
        let relative: PathBuf = native.split('\\').collect();

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(ShareError::InvalidPath(path.to_string()));
        }

        Ok(self.root.join(relative))
    }

    async fn register(&self, entry: OpenEntry) -> FileHandle {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.handles.lock().await.insert(id, entry);
        FileHandle(id)
    }
}

fn map_io(e: std::io::Error, path: &str) -> ShareError {
    match e.kind() {
        ErrorKind::AlreadyExists => ShareError::AlreadyExists(path.to_string()),
        ErrorKind::NotFound => ShareError::NotFound(path.to_string()),
        _ => ShareError::Io(e),
    }
}

#[async_trait]
impl RemoteShare for MountedShare {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        kind: FileKind,
    ) -> Result<FileHandle, ShareError> {
        let local = self.resolve(path)?;

        let entry = match kind {
            FileKind::Directory => {
                match disposition {
                    CreateDisposition::Open => {
                        let metadata = fs::metadata(&local).await.map_err(|e| map_io(e, path))?;
                        if !metadata.is_dir() {
                            return Err(ShareError::NotFound(path.to_string()));
                        }
                    }
                    CreateDisposition::Create | CreateDisposition::OverwriteIf => {
                        fs::create_dir(&local).await.map_err(|e| map_io(e, path))?;
                    }
                }
                OpenEntry::Directory
            }
            FileKind::File => {
                let mut options = OpenOptions::new();
                match disposition {
                    CreateDisposition::Open => options.read(true),
                    CreateDisposition::Create => options.read(true).write(true).create_new(true),
                    CreateDisposition::OverwriteIf => options
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(true),
                };
                let file = options.open(&local).await.map_err(|e| map_io(e, path))?;
                if file.metadata().await?.is_dir() {
                    return Err(ShareError::NotFound(path.to_string()));
                }
                OpenEntry::File(file)
            }
        };

        Ok(self.register(entry).await)
    }

    async fn write(
        &self,
        handle: FileHandle,
        data: &[u8],
        offset: u64,
    ) -> Result<usize, ShareError> {
        let mut handles = self.handles.lock().await;
        let Some(OpenEntry::File(file)) = handles.get_mut(&handle.0) else {
            return Err(ShareError::InvalidHandle(handle.0));
        };

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(data.len())
    }

    async fn read(
        &self,
        handle: FileHandle,
        length: usize,
        offset: u64,
    ) -> Result<Vec<u8>, ShareError> {
        let mut handles = self.handles.lock().await;
        let Some(OpenEntry::File(file)) = handles.get_mut(&handle.0) else {
            return Err(ShareError::InvalidHandle(handle.0));
        };

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buffer = vec![0u8; length];
        let mut filled = 0;
        while filled < length {
            let n = file.read(&mut buffer[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buffer.truncate(filled);
        Ok(buffer)
    }

    async fn query_info(&self, handle: FileHandle) -> Result<RemoteFileInfo, ShareError> {
        let handles = self.handles.lock().await;
        match handles.get(&handle.0) {
            Some(OpenEntry::File(file)) => {
                let metadata = file.metadata().await?;
                Ok(RemoteFileInfo {
                    size: metadata.len(),
                    is_directory: false,
                })
            }
            Some(OpenEntry::Directory) => Ok(RemoteFileInfo {
                size: 0,
                is_directory: true,
            }),
            None => Err(ShareError::InvalidHandle(handle.0)),
        }
    }

    async fn close(&self, handle: FileHandle) -> Result<(), ShareError> {
        let entry = self.handles.lock().await.remove(&handle.0);
        match entry {
            Some(OpenEntry::File(mut file)) => {
                // tokio buffers writes in the background; flush before release
                file.flush().await?;
                file.sync_all().await?;
                Ok(())
            }
            Some(OpenEntry::Directory) => Ok(()),
            None => Err(ShareError::InvalidHandle(handle.0)),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), ShareError> {
        let local = self.resolve(path)?;
        fs::remove_file(&local).await.map_err(|e| map_io(e, path))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), ShareError> {
        let mut handles = self.handles.lock().await;
        for (id, entry) in handles.drain() {
            if let OpenEntry::File(mut file) = entry {
                if let Err(e) = file.flush().await {
                    warn!(handle = id, error = %e, "Failed to flush handle on disconnect");
                }
            }
        }
        debug!(root = %self.root.display(), "Detached from mounted share");
        Ok(())
    }
}
