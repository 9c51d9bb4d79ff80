//! In-memory remote share with fault injection.
//!
//! `SimulatedShare::new()` returns a connector to hand to the agent and a
//! [`ShareController`] that inspects the share contents and injects faults,
//! the same split the simulated volume source uses.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::core::share::{
    CreateDisposition, FileHandle, FileKind, RemoteFileInfo, RemoteShare, ShareConnection,
    ShareConnector, ShareError, native_path,
};

/// One recorded `write` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub path: String,
    pub offset: u64,
    pub len: usize,
}

#[derive(Default)]
struct Faults {
    fail_connect: bool,
    fail_authenticate: bool,
    fail_attach: bool,
    fail_directory_create: bool,
    fail_deletes: bool,
    fail_all_writes: bool,
    fail_next_writes: u32,
    corrupt_writes: bool,
    corrupt_next_writes: u32,
}

struct OpenFile {
    path: String,
    kind: FileKind,
}

#[derive(Default)]
struct ShareState {
    /// Keys are native (backslash) paths
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    handles: HashMap<u64, OpenFile>,
    next_handle: u64,
    writes: Vec<WriteCall>,
    faults: Faults,
    connects: u32,
    disconnects: u32,
    created_dirs: Vec<String>,
}

impl ShareState {
    fn parent_exists(&self, native: &str) -> bool {
        match native.rsplit_once('\\') {
            Some((parent, _)) => self.dirs.contains(parent),
            None => true,
        }
    }

    fn exists(&self, native: &str) -> bool {
        native.is_empty() || self.files.contains_key(native) || self.dirs.contains(native)
    }

    fn open_handle(&mut self, path: String, kind: FileKind) -> FileHandle {
        self.next_handle += 1;
        let id = self.next_handle;
        self.handles.insert(id, OpenFile { path, kind });
        FileHandle(id)
    }
}

type Shared = Arc<Mutex<ShareState>>;

fn lock(state: &Shared) -> MutexGuard<'_, ShareState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct SimulatedShare;

impl SimulatedShare {
    pub fn new() -> (SimulatedConnector, ShareController) {
        let state: Shared = Arc::new(Mutex::new(ShareState::default()));
        (
            SimulatedConnector {
                state: Arc::clone(&state),
            },
            ShareController { state },
        )
    }
}

#[derive(Clone)]
pub struct SimulatedConnector {
    state: Shared,
}

impl SimulatedConnector {
    /// Connect, authenticate and attach in one step.
    pub async fn open_share(&self) -> Result<Box<dyn RemoteShare>, ShareError> {
        let mut conn = self.connect("simulated", 445).await?;
        conn.authenticate("user", "password", "").await?;
        conn.attach_share("share").await
    }
}

#[async_trait]
impl ShareConnector for SimulatedConnector {
    async fn connect(
        &self,
        server: &str,
        port: u16,
    ) -> Result<Box<dyn ShareConnection>, ShareError> {
        let mut state = lock(&self.state);
        if state.faults.fail_connect {
            return Err(ShareError::Connection(format!(
                "simulated connection refused by {}:{}",
                server, port
            )));
        }
        state.connects += 1;
        debug!(server, port, "(SimulatedShare) Connected");

        Ok(Box::new(SimulatedConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedConnection {
    state: Shared,
}

#[async_trait]
impl ShareConnection for SimulatedConnection {
    async fn authenticate(
        &mut self,
        username: &str,
        _password: &str,
        _domain: &str,
    ) -> Result<(), ShareError> {
        if lock(&self.state).faults.fail_authenticate {
            return Err(ShareError::Authentication(format!(
                "simulated logon failure for {}",
                username
            )));
        }
        Ok(())
    }

    async fn attach_share(
        self: Box<Self>,
        share: &str,
    ) -> Result<Box<dyn RemoteShare>, ShareError> {
        let mut state = lock(&self.state);
        if state.faults.fail_attach {
            // A refused tree connect still tears down the session
            state.disconnects += 1;
            return Err(ShareError::Protocol(format!(
                "simulated access denied to share {}",
                share
            )));
        }
        drop(state);

        debug!(share, "(SimulatedShare) Attached");
        Ok(Box::new(SimulatedRemote { state: self.state }))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), ShareError> {
        lock(&self.state).disconnects += 1;
        Ok(())
    }
}

struct SimulatedRemote {
    state: Shared,
}

#[async_trait]
impl RemoteShare for SimulatedRemote {
    async fn create_file(
        &self,
        path: &str,
        disposition: CreateDisposition,
        kind: FileKind,
    ) -> Result<FileHandle, ShareError> {
        let native = native_path(path);
        let mut state = lock(&self.state);

        match (kind, disposition) {
            (FileKind::Directory, CreateDisposition::Open) => {
                if !native.is_empty() && !state.dirs.contains(&native) {
                    return Err(ShareError::NotFound(path.to_string()));
                }
            }
            (FileKind::Directory, _) => {
                if state.faults.fail_directory_create {
                    return Err(ShareError::Protocol("simulated access denied".into()));
                }
                if state.exists(&native) {
                    return Err(ShareError::AlreadyExists(path.to_string()));
                }
                if !state.parent_exists(&native) {
                    return Err(ShareError::NotFound(path.to_string()));
                }
                state.dirs.insert(native.clone());
                state.created_dirs.push(path.to_string());
            }
            (FileKind::File, CreateDisposition::Open) => {
                if !state.files.contains_key(&native) {
                    return Err(ShareError::NotFound(path.to_string()));
                }
            }
            (FileKind::File, CreateDisposition::Create) => {
                if state.exists(&native) {
                    return Err(ShareError::AlreadyExists(path.to_string()));
                }
                if !state.parent_exists(&native) {
                    return Err(ShareError::NotFound(path.to_string()));
                }
                state.files.insert(native.clone(), Vec::new());
            }
            (FileKind::File, CreateDisposition::OverwriteIf) => {
                if state.dirs.contains(&native) {
                    return Err(ShareError::AlreadyExists(path.to_string()));
                }
                if !state.parent_exists(&native) {
                    return Err(ShareError::NotFound(path.to_string()));
                }
                state.files.insert(native.clone(), Vec::new());
            }
        }

        Ok(state.open_handle(native, kind))
    }

    async fn write(
        &self,
        handle: FileHandle,
        data: &[u8],
        offset: u64,
    ) -> Result<usize, ShareError> {
        let mut state = lock(&self.state);
        let path = match state.handles.get(&handle.0) {
            Some(open) if open.kind == FileKind::File => open.path.clone(),
            _ => return Err(ShareError::InvalidHandle(handle.0)),
        };

        state.writes.push(WriteCall {
            path: path.clone(),
            offset,
            len: data.len(),
        });

        if state.faults.fail_all_writes {
            return Err(ShareError::Protocol("simulated write failure".into()));
        }
        if state.faults.fail_next_writes > 0 {
            state.faults.fail_next_writes -= 1;
            return Err(ShareError::Protocol("simulated write failure".into()));
        }

        let mut corrupt = offset == 0 && !data.is_empty() && state.faults.corrupt_writes;
        if offset == 0 && !data.is_empty() && state.faults.corrupt_next_writes > 0 {
            state.faults.corrupt_next_writes -= 1;
            corrupt = true;
        }
        let file = state
            .files
            .get_mut(&path)
            .ok_or_else(|| ShareError::NotFound(path.clone()))?;

        let start = offset as usize;
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        if corrupt {
            file[start] ^= 0xFF;
        }

        Ok(data.len())
    }

    async fn read(
        &self,
        handle: FileHandle,
        length: usize,
        offset: u64,
    ) -> Result<Vec<u8>, ShareError> {
        let state = lock(&self.state);
        let open = state
            .handles
            .get(&handle.0)
            .ok_or(ShareError::InvalidHandle(handle.0))?;
        let file = state
            .files
            .get(&open.path)
            .ok_or_else(|| ShareError::NotFound(open.path.clone()))?;

        let start = (offset as usize).min(file.len());
        let end = start.saturating_add(length).min(file.len());
        Ok(file[start..end].to_vec())
    }

    async fn query_info(&self, handle: FileHandle) -> Result<RemoteFileInfo, ShareError> {
        let state = lock(&self.state);
        let open = state
            .handles
            .get(&handle.0)
            .ok_or(ShareError::InvalidHandle(handle.0))?;

        match open.kind {
            FileKind::Directory => Ok(RemoteFileInfo {
                size: 0,
                is_directory: true,
            }),
            FileKind::File => {
                let file = state
                    .files
                    .get(&open.path)
                    .ok_or_else(|| ShareError::NotFound(open.path.clone()))?;
                Ok(RemoteFileInfo {
                    size: file.len() as u64,
                    is_directory: false,
                })
            }
        }
    }

    async fn close(&self, handle: FileHandle) -> Result<(), ShareError> {
        lock(&self.state)
            .handles
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(ShareError::InvalidHandle(handle.0))
    }

    async fn delete(&self, path: &str) -> Result<(), ShareError> {
        let native = native_path(path);
        let mut state = lock(&self.state);
        if state.faults.fail_deletes {
            return Err(ShareError::Protocol("simulated delete failure".into()));
        }
        state
            .files
            .remove(&native)
            .map(|_| ())
            .ok_or_else(|| ShareError::NotFound(path.to_string()))
    }

    async fn disconnect(self: Box<Self>) -> Result<(), ShareError> {
        let mut state = lock(&self.state);
        state.handles.clear();
        state.disconnects += 1;
        debug!("(SimulatedShare) Disconnected");
        Ok(())
    }
}

/// Test-side view of a [`SimulatedShare`]. Paths are forward-slash.
#[derive(Clone)]
pub struct ShareController {
    state: Shared,
}

impl ShareController {
    /// Seed a file, creating its parent directories.
    pub fn put_file(&self, path: &str, content: Vec<u8>) {
        let native = native_path(path);
        if let Some((parent, _)) = native.rsplit_once('\\') {
            self.put_native_dir(parent);
        }
        lock(&self.state).files.insert(native, content);
    }

    /// Seed a directory and its parents.
    pub fn put_dir(&self, path: &str) {
        self.put_native_dir(&native_path(path));
    }

    fn put_native_dir(&self, native: &str) {
        let mut state = lock(&self.state);
        let mut current = String::new();
        for part in native.split('\\').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('\\');
            }
            current.push_str(part);
            state.dirs.insert(current.clone());
        }
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(&native_path(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        lock(&self.state).dirs.contains(&native_path(path))
    }

    /// Forward-slash paths of every stored file.
    pub fn file_paths(&self) -> Vec<String> {
        lock(&self.state)
            .files
            .keys()
            .map(|k| format!("/{}", k.replace('\\', "/")))
            .collect()
    }

    /// Directories created through the share, in creation order.
    pub fn created_dirs(&self) -> Vec<String> {
        lock(&self.state).created_dirs.clone()
    }

    pub fn write_calls(&self) -> Vec<WriteCall> {
        lock(&self.state).writes.clone()
    }

    pub fn open_handles(&self) -> usize {
        lock(&self.state).handles.len()
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn disconnects(&self) -> u32 {
        lock(&self.state).disconnects
    }

    pub fn fail_connect(&self, enabled: bool) {
        lock(&self.state).faults.fail_connect = enabled;
    }

    pub fn fail_authenticate(&self, enabled: bool) {
        lock(&self.state).faults.fail_authenticate = enabled;
    }

    /// Refuse the share attach; the connection is released as part of the
    /// refusal.
    pub fn fail_attach(&self, enabled: bool) {
        lock(&self.state).faults.fail_attach = enabled;
    }

    pub fn fail_deletes(&self, enabled: bool) {
        lock(&self.state).faults.fail_deletes = enabled;
    }

    pub fn fail_directory_create(&self, enabled: bool) {
        lock(&self.state).faults.fail_directory_create = enabled;
    }

    pub fn fail_all_writes(&self, enabled: bool) {
        lock(&self.state).faults.fail_all_writes = enabled;
    }

    pub fn fail_next_writes(&self, count: u32) {
        lock(&self.state).faults.fail_next_writes = count;
    }

    /// Flip the first byte of every write at offset 0 without reporting an
    /// error.
    pub fn corrupt_writes(&self, enabled: bool) {
        lock(&self.state).faults.corrupt_writes = enabled;
    }

    /// Like [`corrupt_writes`](Self::corrupt_writes) for the next `count`
    /// writes at offset 0 only.
    pub fn corrupt_next_writes(&self, count: u32) {
        lock(&self.state).faults.corrupt_next_writes = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_existing_directory_reports_already_exists() {
        let (connector, controller) = SimulatedShare::new();
        controller.put_dir("/incoming");
        let share = connector.open_share().await.unwrap();

        let err = share
            .create_file("/incoming", CreateDisposition::Create, FileKind::Directory)
            .await
            .unwrap_err();

        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let (connector, _controller) = SimulatedShare::new();
        let share = connector.open_share().await.unwrap();

        let err = share
            .create_file("/a/b", CreateDisposition::Create, FileKind::Directory)
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_paths_stored_in_native_form() {
        let (connector, controller) = SimulatedShare::new();
        controller.put_dir("/incoming/session");
        let share = connector.open_share().await.unwrap();

        let handle = share
            .create_file(
                "/incoming/session/a.JPG",
                CreateDisposition::OverwriteIf,
                FileKind::File,
            )
            .await
            .unwrap();
        share.write(handle, b"abc", 0).await.unwrap();
        share.close(handle).await.unwrap();

        assert_eq!(controller.write_calls()[0].path, "incoming\\session\\a.JPG");
        assert_eq!(controller.file_paths(), vec!["/incoming/session/a.JPG"]);
    }

    #[tokio::test]
    async fn test_refused_attach_releases_connection() {
        let (connector, controller) = SimulatedShare::new();
        controller.fail_attach(true);

        assert!(connector.open_share().await.is_err());
        assert_eq!(controller.connects(), 1);
        assert_eq!(controller.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_read_past_end_is_empty() {
        let (connector, controller) = SimulatedShare::new();
        controller.put_file("/x.JPG", b"abc".to_vec());
        let share = connector.open_share().await.unwrap();

        let handle = share
            .create_file("/x.JPG", CreateDisposition::Open, FileKind::File)
            .await
            .unwrap();
        assert_eq!(share.read(handle, 10, 1).await.unwrap(), b"bc");
        assert!(share.read(handle, 10, 3).await.unwrap().is_empty());
        share.close(handle).await.unwrap();
    }
}
