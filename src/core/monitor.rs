use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::hardware::VolumeSource;
use crate::core::models::Volume;
use crate::core::scanner::ContentScanner;

/// Mount paths already handed off for transfer during this process.
#[derive(Debug, Default)]
pub struct ProcessedVolumes {
    paths: HashSet<PathBuf>,
}

impl ProcessedVolumes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn insert(&mut self, path: PathBuf) -> bool {
        self.paths.insert(path)
    }

    /// Forget every path that is no longer mounted, so a remount is reported again.
    pub fn retain_mounted(&mut self, mounted: &BTreeSet<PathBuf>) {
        let before = self.paths.len();
        self.paths.retain(|path| mounted.contains(path));
        let pruned = before - self.paths.len();
        if pruned > 0 {
            debug!(pruned, "Forgot unmounted volumes");
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Finds newly inserted cards by polling every volume source.
///
/// Scanning touches the local filesystem and blocks; callers on the runtime
/// move the monitor into `spawn_blocking`.
pub struct DeviceMonitor {
    sources: Vec<Box<dyn VolumeSource>>,
    scanner: ContentScanner,
    processed: ProcessedVolumes,
}

impl DeviceMonitor {
    pub fn new(sources: Vec<Box<dyn VolumeSource>>, scanner: ContentScanner) -> Self {
        Self {
            sources,
            scanner,
            processed: ProcessedVolumes::new(),
        }
    }

    /// Union of all sources. A failing source contributes nothing this cycle.
    pub fn mounted_volumes(&self) -> BTreeSet<PathBuf> {
        let mut mounted = BTreeSet::new();

        for source in &self.sources {
            match source.mounted_volumes() {
                Ok(paths) => mounted.extend(paths),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "Volume enumeration failed");
                }
            }
        }

        mounted
    }

    /// Report mounted volumes that have qualifying content and were not reported
    /// since they were mounted.
    pub fn scan(&mut self) -> Vec<Volume> {
        let mounted = self.mounted_volumes();
        let mut found = Vec::new();

        for path in &mounted {
            if self.processed.contains(path) {
                continue;
            }

            if self.scanner.has_qualifying_content(path) {
                info!(volume = %path.display(), "New card with photos detected");
                self.processed.insert(path.clone());
                found.push(Volume::new(path.clone()));
            } else {
                debug!(volume = %path.display(), "Volume has no qualifying files yet");
            }
        }

        self.processed.retain_mounted(&mounted);
        found
    }

    pub fn processed(&self) -> &ProcessedVolumes {
        &self.processed
    }

    pub fn scanner(&self) -> &ContentScanner {
        &self.scanner
    }
}
