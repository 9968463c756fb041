//! File access for manifest sources.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Read access to the device image.
///
/// Paths are device paths (`/vendor/etc/vintf/manifest.toml`).
pub trait FileSystem: Send + Sync {
    /// Contents of `path`, or `None` when it does not exist.
    fn fetch(&self, path: &str) -> Result<Option<String>>;

    /// Basenames of the regular files in `dir`, sorted. Empty when `dir` is missing.
    fn list_files(&self, dir: &str) -> Result<Vec<String>>;

    /// Basenames in `dir` matching a glob `pattern`, sorted.
    fn glob(&self, dir: &str, pattern: &str) -> Result<Vec<String>> {
        let pattern = glob::Pattern::new(pattern)
            .with_context(|| format!("invalid file pattern `{}`", pattern))?;
        Ok(self
            .list_files(dir)?
            .into_iter()
            .filter(|name| pattern.matches(name))
            .collect())
    }
}

/// Files under a host directory that stands in for the device's `/`.
#[derive(Debug, Clone)]
pub struct RealFileSystem {
    root: PathBuf,
}

impl RealFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RealFileSystem { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path for a device path.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Default for RealFileSystem {
    fn default() -> Self {
        RealFileSystem::new("/")
    }
}

impl FileSystem for RealFileSystem {
    fn fetch(&self, path: &str) -> Result<Option<String>> {
        let host = self.host_path(path);
        match std::fs::read_to_string(&host) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read file: {}", host.display())),
        }
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let host = self.host_path(dir);
        let entries = match std::fs::read_dir(&host) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read directory: {}", host.display()))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
