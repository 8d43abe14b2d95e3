//! Retention of capture files on disk.
//!
//! After each successful capture the output directory is trimmed to the most
//! recent `max_saved` matching files, newest first by modification time.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// Keeps the newest N matching files in a directory.
#[derive(Debug, Clone)]
pub struct Retention {
    dir: PathBuf,
    keep: usize,
    pattern: Regex,
}

impl Retention {
    /// Create a retention policy for `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn new(dir: impl Into<PathBuf>, keep: usize, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::config_validation(format!("invalid retention pattern {pattern}: {e}"))
        })?;
        Ok(Self {
            dir: dir.into(),
            keep,
            pattern,
        })
    }

    /// Create the retention policy described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured pattern is not a valid regex.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.capture.output_dir,
            config.retention.max_saved,
            &config.retention.pattern,
        )
    }

    /// The directory being trimmed.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files kept.
    #[must_use]
    pub fn keep(&self) -> usize {
        self.keep
    }

    /// List matching files, newest first.
    ///
    /// Files whose modification time cannot be read sort as oldest. Files
    /// with equal times keep their directory listing order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read.
    pub fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut files: Vec<(PathBuf, Option<SystemTime>)> = Vec::new();
        for entry in fs::read_dir(&self.dir)?.flatten() {
            let path = entry.path();
            if !self.matches(&path) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) if !metadata.is_file() => continue,
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    debug!("Cannot stat {}: {}", path.display(), e);
                    None
                }
            };
            let modified = metadata.and_then(|m| m.modified().ok());
            files.push((path, modified));
        }

        files.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(files.into_iter().map(|(path, _)| path).collect())
    }

    /// Delete every matching file beyond the newest `keep`.
    ///
    /// Returns the files that were removed. Failures are logged and do not
    /// stop the remaining deletions.
    pub fn rotate(&self) -> Vec<PathBuf> {
        let files = match self.candidates() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        remove_all(files.into_iter().skip(self.keep))
    }

    fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.pattern.is_match(name))
    }
}

/// Delete each path in turn, returning the ones that were removed.
fn remove_all(paths: impl IntoIterator<Item = PathBuf>) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed old file: {}", path.display());
                removed.push(path);
            }
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    use crate::logging::init_test_logging;

    const JPG: &str = r"\.jpg$";

    fn write_at(dir: &Path, name: &str, secs: u64) -> PathBuf {
        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
        path
    }

    fn remaining(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rotate_removes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = write_at(dir.path(), "capture_t1.jpg", 1_000);
        write_at(dir.path(), "capture_t2.jpg", 2_000);
        write_at(dir.path(), "capture_t3.jpg", 3_000);

        let retention = Retention::new(dir.path(), 2, JPG).unwrap();
        let removed = retention.rotate();

        assert_eq!(removed, vec![t1]);
        assert_eq!(remaining(dir.path()), ["capture_t2.jpg", "capture_t3.jpg"]);
    }

    #[test]
    fn test_rotate_orders_by_mtime_not_name() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "a.jpg", 3_000);
        let oldest = write_at(dir.path(), "z.jpg", 1_000);
        write_at(dir.path(), "m.jpg", 2_000);

        let retention = Retention::new(dir.path(), 2, JPG).unwrap();
        assert_eq!(retention.rotate(), vec![oldest]);
    }

    #[test]
    fn test_rotate_under_limit_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "a.jpg", 1_000);
        write_at(dir.path(), "b.jpg", 2_000);

        let retention = Retention::new(dir.path(), 10, JPG).unwrap();
        assert!(retention.rotate().is_empty());
        assert_eq!(remaining(dir.path()).len(), 2);
    }

    #[test]
    fn test_rotate_zero_keep_removes_all() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "a.jpg", 1_000);
        write_at(dir.path(), "b.jpg", 2_000);

        let retention = Retention::new(dir.path(), 0, JPG).unwrap();
        assert_eq!(retention.rotate().len(), 2);
        assert!(remaining(dir.path()).is_empty());
    }

    #[test]
    fn test_rotate_ignores_non_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        write_at(dir.path(), "notes.txt", 1);
        write_at(dir.path(), "preview.png", 2);
        write_at(dir.path(), "a.jpg", 1_000);
        write_at(dir.path(), "b.jpg", 2_000);
        fs::create_dir(dir.path().join("old.jpg")).unwrap();

        let retention = Retention::new(dir.path(), 1, JPG).unwrap();
        let removed = retention.rotate();

        assert_eq!(removed, vec![dir.path().join("a.jpg")]);
        assert_eq!(
            remaining(dir.path()),
            ["b.jpg", "notes.txt", "old.jpg", "preview.png"]
        );
    }

    #[test]
    fn test_rotate_never_leaves_more_than_keep() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..12 {
            write_at(dir.path(), &format!("capture_{i:02}.jpg"), 1_000 + i);
        }

        for keep in [5, 3, 1, 0] {
            let retention = Retention::new(dir.path(), keep, JPG).unwrap();
            retention.rotate();
            assert!(retention.candidates().unwrap().len() <= keep);
        }
    }

    #[test]
    fn test_rotate_missing_directory() {
        let retention = Retention::new("/nonexistent/picapture", 2, JPG).unwrap();
        assert!(retention.candidates().is_err());
        assert!(retention.rotate().is_empty());
    }

    #[test]
    fn test_candidates_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_at(dir.path(), "a.jpg", 1_000);
        let b = write_at(dir.path(), "b.jpg", 3_000);
        let c = write_at(dir.path(), "c.jpg", 2_000);

        let retention = Retention::new(dir.path(), 3, JPG).unwrap();
        assert_eq!(retention.candidates().unwrap(), vec![b, c, a]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Retention::new("/captures", 2, "[invalid").unwrap_err();
        assert!(matches!(err, Error::ConfigValidation { .. }));
    }

    #[test]
    fn test_from_config() {
        let mut config = Config::default();
        config.capture.output_dir = PathBuf::from("/data");
        config.retention.max_saved = 4;

        let retention = Retention::from_config(&config).unwrap();
        assert_eq!(retention.dir(), Path::new("/data"));
        assert_eq!(retention.keep(), 4);
    }

    #[test]
    fn test_remove_all_continues_past_failures() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let first = write_at(dir.path(), "a.jpg", 10);
        let missing = dir.path().join("gone.jpg");
        let last = write_at(dir.path(), "c.jpg", 30);

        let removed = remove_all(vec![first.clone(), missing, last.clone()]);

        assert_eq!(removed, vec![first.clone(), last.clone()]);
        assert!(!first.exists());
        assert!(!last.exists());
    }
}
