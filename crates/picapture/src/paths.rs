//! Mapping capture paths into the host's filesystem namespace.
//!
//! When the daemon runs in a container, the output directory is usually a
//! bind mount. Consumers on the host need the host-side path, so records are
//! rewritten through a [`PathMapper`] before publishing.

use std::path::{Path, PathBuf};

/// Rewrites paths under the output directory onto an external prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    output_dir: PathBuf,
    host_prefix: Option<PathBuf>,
}

impl PathMapper {
    /// Create a mapper for `output_dir`, rewriting onto `host_prefix` if set.
    ///
    /// An empty prefix counts as unset.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>, host_prefix: Option<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            host_prefix: host_prefix.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Map `path` to its host-visible form.
    ///
    /// Paths outside the output directory, and all paths when no prefix is
    /// configured, are returned unchanged. Matching is per path component, so
    /// `/captures2/a.jpg` is not considered to be under `/captures`.
    #[must_use]
    pub fn map(&self, path: &Path) -> PathBuf {
        let Some(prefix) = &self.host_prefix else {
            return path.to_path_buf();
        };
        match path.strip_prefix(&self.output_dir) {
            Ok(relative) if relative.as_os_str().is_empty() => prefix.clone(),
            Ok(relative) => prefix.join(relative),
            Err(_) => path.to_path_buf(),
        }
    }
}
