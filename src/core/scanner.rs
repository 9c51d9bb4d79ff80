//! Photo discovery on a mounted volume.
//!
//! A file qualifies when its extension is on the allow-list (compared
//! case-insensitively) and its size is at least the configured minimum.
//! Camera cards keep their images under `DCIM/`, so that subtree is looked at
//! first.

use std::collections::BTreeMap;
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::MonitoringConfig;
use crate::core::hardware::is_device_removed_error;
use crate::core::models::CandidateFile;

const DCIM_DIR: &str = "DCIM";

#[derive(Debug, Clone)]
pub struct ContentScanner {
    /// Lowercase, dot-prefixed
    extensions: Vec<String>,
    min_file_size: u64,
}

impl ContentScanner {
    pub fn new<I, S>(extensions: I, min_file_size: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .filter_map(|ext| normalize_extension(ext.as_ref()))
                .collect(),
            min_file_size,
        }
    }

    pub fn from_config(config: &MonitoringConfig) -> Self {
        Self::new(&config.supported_extensions, config.min_file_size)
    }

    /// Whether the extension of `path` is allow-listed.
    pub fn matches_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension() else {
            return false;
        };
        let ext = format!(".{}", ext.to_string_lossy().to_lowercase());
        self.extensions.iter().any(|allowed| *allowed == ext)
    }

    /// True on the first qualifying file under `DCIM/` (or the root when the
    /// volume has no `DCIM/`).
    pub fn has_qualifying_content(&self, root: &Path) -> bool {
        let dcim = root.join(DCIM_DIR);
        let start = if dcim.is_dir() { dcim } else { root.to_path_buf() };

        let found = self.walk(&start, &mut |_| ControlFlow::Break(()));
        found.is_break()
    }

    /// All qualifying files from `DCIM/` and from the root, deduplicated and
    /// sorted by path.
    pub fn list_qualifying_files(&self, root: &Path) -> Vec<CandidateFile> {
        info!(root = %root.display(), "Scanning for photos");

        let mut found: BTreeMap<PathBuf, u64> = BTreeMap::new();
        let mut collect = |file: CandidateFile| {
            found.insert(file.path, file.size);
            ControlFlow::Continue(())
        };

        let dcim = root.join(DCIM_DIR);
        if dcim.is_dir() {
            let _ = self.walk(&dcim, &mut collect);
        }
        let _ = self.walk(root, &mut collect);

        debug!(root = %root.display(), count = found.len(), "Scan complete");

        found
            .into_iter()
            .map(|(path, size)| CandidateFile { path, size })
            .collect()
    }

    /// Depth-first walk calling `visit` for every qualifying file until it
    /// breaks. Unreadable entries are logged and skipped; symlinks are not
    /// followed.
    fn walk(
        &self,
        dir: &Path,
        visit: &mut dyn FnMut(CandidateFile) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    path = %dir.display(),
                    error = %e,
                    volume_removed = is_device_removed_error(&e),
                    "Cannot read directory"
                );
                return ControlFlow::Continue(());
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "Skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();

            let metadata = match path.symlink_metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot access file");
                    continue;
                }
            };

            if metadata.is_dir() {
                self.walk(&path, visit)?;
            } else if metadata.is_file()
                && self.matches_extension(&path)
                && metadata.len() >= self.min_file_size
            {
                visit(CandidateFile {
                    path,
                    size: metadata.len(),
                })?;
            }
        }

        ControlFlow::Continue(())
    }
}

/// Lowercase with a single leading dot; blank entries are dropped.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sized_file(path: &Path, size: u64) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let file = fs::File::create(path).unwrap();
        file.set_len(size).unwrap();
    }

    fn names(files: &[CandidateFile]) -> Vec<String> {
        files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_min_size_filter_in_dcim() {
        let temp = tempdir().unwrap();
        sized_file(&temp.path().join("DCIM/100/a.JPG"), 2_000_000);
        sized_file(&temp.path().join("DCIM/100/b.JPG"), 500_000);

        let scanner = ContentScanner::new([".JPG"], 1_000_000);
        let files = scanner.list_qualifying_files(temp.path());

        assert_eq!(names(&files), vec!["a.JPG"]);
        assert_eq!(files[0].size, 2_000_000);
    }

    #[test]
    fn test_extension_filter_anywhere() {
        let temp = tempdir().unwrap();
        sized_file(&temp.path().join("DCIM/100/clip.MP4"), 5_000);
        sized_file(&temp.path().join("notes.txt"), 5_000);
        sized_file(&temp.path().join("loose.nef"), 5_000);

        let scanner = ContentScanner::new([".JPG", ".NEF"], 1_000);
        let files = scanner.list_qualifying_files(temp.path());

        assert_eq!(names(&files), vec!["loose.nef"]);
    }

    #[test]
    fn test_extension_match_is_case_insensitive() {
        let scanner = ContentScanner::new(["jpg"], 0);
        assert!(scanner.matches_extension(Path::new("IMG_0001.JPG")));
        assert!(scanner.matches_extension(Path::new("img_0001.jpg")));
        assert!(!scanner.matches_extension(Path::new("img_0001.jpeg")));
        assert!(!scanner.matches_extension(Path::new(".jpg")));
        assert!(!scanner.matches_extension(Path::new("README")));
    }

    #[test]
    fn test_dcim_and_root_results_are_deduplicated() {
        let temp = tempdir().unwrap();
        sized_file(&temp.path().join("DCIM/100/a.JPG"), 10);
        sized_file(&temp.path().join("DCIM/101/b.JPG"), 10);
        sized_file(&temp.path().join("extra/c.JPG"), 10);

        let scanner = ContentScanner::new([".jpg"], 1);
        let files = scanner.list_qualifying_files(temp.path());

        assert_eq!(names(&files), vec!["a.JPG", "b.JPG", "c.JPG"]);
    }

    #[test]
    fn test_has_qualifying_content_prefers_dcim() {
        let temp = tempdir().unwrap();
        fs::create_dir_all(temp.path().join("DCIM")).unwrap();
        sized_file(&temp.path().join("a.JPG"), 100);

        let scanner = ContentScanner::new([".jpg"], 1);
        // DCIM exists but is empty, so the root file is not considered
        assert!(!scanner.has_qualifying_content(temp.path()));

        sized_file(&temp.path().join("DCIM/100/b.JPG"), 100);
        assert!(scanner.has_qualifying_content(temp.path()));
    }

    #[test]
    fn test_has_qualifying_content_falls_back_to_root() {
        let temp = tempdir().unwrap();
        sized_file(&temp.path().join("photos/a.JPG"), 100);

        let scanner = ContentScanner::new([".jpg"], 1);
        assert!(scanner.has_qualifying_content(temp.path()));

        let strict = ContentScanner::new([".jpg"], 1_000);
        assert!(!strict.has_qualifying_content(temp.path()));
    }

    #[test]
    fn test_empty_allow_list_matches_nothing() {
        let temp = tempdir().unwrap();
        sized_file(&temp.path().join("DCIM/a.JPG"), 100);

        let scanner = ContentScanner::new(Vec::<String>::new(), 0);
        assert!(scanner.list_qualifying_files(temp.path()).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let temp = tempdir().unwrap();
        let outside = tempdir().unwrap();
        sized_file(&outside.path().join("a.JPG"), 100);
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        let scanner = ContentScanner::new([".jpg"], 1);
        assert!(scanner.list_qualifying_files(temp.path()).is_empty());
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension(".JPG").as_deref(), Some(".jpg"));
        assert_eq!(normalize_extension("Cr2").as_deref(), Some(".cr2"));
        assert_eq!(normalize_extension("  "), None);
    }
}
