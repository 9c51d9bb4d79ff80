use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::bail;

use crate::core::hardware::VolumeSource;

#[derive(Default)]
struct SimulatedState {
    mounted: BTreeSet<PathBuf>,
    fail_next_scan: bool,
}

/// Handle for mounting and unmounting simulated volumes.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimulatedState>>,
}

impl Simulator {
    pub fn add_volume(&self, mount_path: impl AsRef<Path>) {
        if let Ok(mut state) = self.state.lock() {
            state.mounted.insert(mount_path.as_ref().to_path_buf());
        }
    }

    pub fn remove_volume(&self, mount_path: impl AsRef<Path>) {
        if let Ok(mut state) = self.state.lock() {
            state.mounted.remove(mount_path.as_ref());
        }
    }

    /// Make the next enumeration return an error.
    pub fn fail_next_scan(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next_scan = true;
        }
    }
}

/// Volume source whose mount table is driven by a [`Simulator`].
pub struct SimulatedAdapter {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedAdapter {
    pub fn new() -> (Self, Simulator) {
        let state = Arc::new(Mutex::new(SimulatedState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            Simulator { state },
        )
    }
}

impl VolumeSource for SimulatedAdapter {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn mounted_volumes(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => bail!("simulated mount table lock poisoned"),
        };

        if state.fail_next_scan {
            state.fail_next_scan = false;
            bail!("simulated enumeration failure");
        }

        Ok(state.mounted.iter().cloned().collect())
    }
}
