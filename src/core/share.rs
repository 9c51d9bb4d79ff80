//! Boundary to the remote file share.
//!
//! The agent never touches wire-level framing. Everything it needs from the
//! share protocol is expressed by three traits that mirror the life of an
//! SMB-style session: a [`ShareConnector`] opens a [`ShareConnection`], which is
//! authenticated and then attached to a share, yielding a [`RemoteShare`] that
//! performs handle-based file operations.
//!
//! Paths handed to these traits are forward-slash paths relative to the share
//! root (`/incoming/20240102_030405_CARD1/a.JPG`). Implementations convert them
//! to the protocol's native form with [`native_path`].

use async_trait::async_trait;
use thiserror::Error;

/// Status-bearing errors returned by share operations.
///
/// `AlreadyExists` and `NotFound` are explicit so callers can branch on them
/// instead of inspecting messages.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(u64),

    #[error("Invalid remote path: {0}")]
    InvalidPath(String),

    #[error("I/O error on share: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl ShareError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// What `create_file` does when the target does or does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// Open an existing object; `NotFound` otherwise.
    Open,
    /// Create a new object; `AlreadyExists` if present.
    Create,
    /// Create, or truncate an existing file to zero length.
    OverwriteIf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub size: u64,
    pub is_directory: bool,
}

#[async_trait]
pub trait ShareConnector: Send + Sync {
    async fn connect(&self, server: &str, port: u16)
    -> Result<Box<dyn ShareConnection>, ShareError>;
}

#[async_trait]
pub trait ShareConnection: Send + Sync {
    async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        domain: &str,
    ) -> Result<(), ShareError>;

    /// Attach to `share`. On failure the implementation releases the
    /// connection itself.
    async fn attach_share(self: Box<Self>, share: &str)
    -> Result<Box<dyn RemoteShare>, ShareError>;

    async fn disconnect(self: Box<Self>) -> Result<(), ShareError>;
}

#[async_trait]
pub trait RemoteShare: Send + Sync {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        kind: FileKind,
    ) -> Result<FileHandle, ShareError>;

    /// Write `data` at `offset`, returning the number of bytes accepted.
    async fn write(&self, handle: FileHandle, data: &[u8], offset: u64)
    -> Result<usize, ShareError>;

    /// Read up to `length` bytes at `offset`. An empty buffer means end of file.
    async fn read(
        &self,
        handle: FileHandle,
        length: usize,
        offset: u64,
    ) -> Result<Vec<u8>, ShareError>;

    async fn query_info(&self, handle: FileHandle) -> Result<RemoteFileInfo, ShareError>;

    async fn close(&self, handle: FileHandle) -> Result<(), ShareError>;

    async fn delete(&self, path: &str) -> Result<(), ShareError>;

    /// Tear down share, session and connection.
    async fn disconnect(self: Box<Self>) -> Result<(), ShareError>;
}

/// Convert a forward-slash path into the share's native, root-relative form.
pub fn native_path(path: &str) -> String {
    path.split('/')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Join a remote directory and a file name with a forward slash.
pub fn join_remote(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}
