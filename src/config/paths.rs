//! Per-user path layout
//!
//! Every location is derived from the executable's base name, so renaming the
//! binary gives an independent site:
//!
//! ```text
//! ~/.config/<name>.yaml            # configuration (read-only)
//! ~/.cache/<name>/                 # working copy served over HTTP
//! ~/.cache/<name>.lock             # flock held while syncing
//! ~/.cache/.<name>.partial-*       # clone staging, renamed into place
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors returned while resolving per-user directories.
#[derive(Error, Debug)]
pub enum PathsError {
    /// The platform has no per-user configuration directory.
    #[error("unable to determine the user configuration directory")]
    ConfigDirNotFound,
    /// The platform has no per-user cache directory.
    #[error("unable to determine the user cache directory")]
    CacheDirNotFound,
    /// The executable name could not be determined.
    #[error("unable to determine the executable name")]
    NoExecutableName,
}

/// Resolved filesystem locations for one site.
#[derive(Debug, Clone)]
pub struct AppPaths {
    name: String,
    config_file: PathBuf,
    working_copy: PathBuf,
}

impl AppPaths {
    /// Creates paths rooted at explicit config and cache directories
    pub fn new(name: impl Into<String>, config_dir: &Path, cache_dir: &Path) -> Self {
        let name = name.into();
        Self {
            config_file: config_dir.join(format!("{}.yaml", name)),
            working_copy: cache_dir.join(&name),
            name,
        }
    }

    /// Creates paths for `name` under the platform's per-user directories
    ///
    /// Uses `dirs::config_dir()` and `dirs::cache_dir()`, which resolve to:
    /// - Linux: `~/.config` and `~/.cache`
    /// - macOS: `~/Library/Application Support` and `~/Library/Caches`
    pub fn for_user(name: impl Into<String>) -> Result<Self, PathsError> {
        let config_dir = dirs::config_dir().ok_or(PathsError::ConfigDirNotFound)?;
        let cache_dir = dirs::cache_dir().ok_or(PathsError::CacheDirNotFound)?;
        Ok(Self::new(name, &config_dir, &cache_dir))
    }

    /// Replaces the configuration file location
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    /// Replaces the working copy location
    pub fn with_working_copy(mut self, path: impl Into<PathBuf>) -> Self {
        self.working_copy = path.into();
        self
    }

    /// Returns the site name (the executable's base name)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configuration file path: `{config_dir}/{name}.yaml`
    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Returns the working copy directory: `{cache_dir}/{name}`
    pub fn working_copy(&self) -> &Path {
        &self.working_copy
    }

    /// Returns the sync lock file: `{working_copy}.lock`
    pub fn lock_file(&self) -> PathBuf {
        lock_path_for(&self.working_copy)
    }
}

/// Returns the base name of the running executable, as the original
/// invocation spelled it.
pub fn executable_name() -> Result<String, PathsError> {
    let arg0 = std::env::args_os().next().ok_or(PathsError::NoExecutableName)?;
    executable_name_from(&arg0).ok_or(PathsError::NoExecutableName)
}

fn executable_name_from(arg0: &OsString) -> Option<String> {
    let name = Path::new(arg0).file_name()?.to_string_lossy().into_owned();
    // Windows builds are invoked as `<name>.exe`; the config file is `<name>.yaml`.
    let name = name.strip_suffix(".exe").unwrap_or(&name).to_string();
    if name.is_empty() { None } else { Some(name) }
}

/// Returns the lock file guarding `target`: a sibling named `<target>.lock`.
pub fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("working-copy"));
    name.push(".lock");
    target.with_file_name(name)
}
