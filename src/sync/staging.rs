//! Staging directories for clones.
//!
//! A clone is written to a hidden sibling of the target and renamed into
//! place only after it succeeded, so the target path never holds a partial
//! checkout. Rename within one directory is atomic on POSIX.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Global counter for unique staging names within a process
static STAGING_COUNTER: AtomicU64 = AtomicU64::new(0);

const PARTIAL_MARKER: &str = ".partial-";

/// A not-yet-published clone destination. Removed on drop unless committed.
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    target: PathBuf,
    committed: bool,
}

fn staging_prefix(target: &Path) -> OsString {
    let mut prefix = OsString::from(".");
    prefix.push(target.file_name().unwrap_or(OsStr::new("working-copy")));
    prefix.push(PARTIAL_MARKER);
    prefix
}

impl StagingDir {
    /// Reserve a staging path next to `target`: `.{name}.partial-{pid}.{n}`.
    ///
    /// Parent directories are created; the staging directory itself is not,
    /// since clone creates it.
    pub fn new(target: &Path) -> io::Result<Self> {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        loop {
            let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
            let mut name = staging_prefix(target);
            name.push(format!("{}.{}", std::process::id(), counter));
            let path = target.with_file_name(name);

            // Retry if the path survived a prior crash with the same pid.
            if std::fs::symlink_metadata(&path).is_ok() {
                continue;
            }

            return Ok(Self {
                path,
                target: target.to_path_buf(),
                committed: false,
            });
        }
    }

    /// Where the clone should be written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged checkout to the target path.
    ///
    /// An empty directory at the target is replaced; anything else is left
    /// alone and reported as `AlreadyExists`.
    pub fn commit(mut self) -> io::Result<()> {
        match std::fs::symlink_metadata(&self.target) {
            Ok(meta) if meta.is_dir() && is_empty_dir(&self.target)? => {
                std::fs::remove_dir(&self.target)?;
            }
            Ok(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} already exists", self.target.display()),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        std::fs::rename(&self.path, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}

pub(crate) fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

/// Remove staging directories left behind by interrupted clones of `target`.
///
/// Must only be called while holding the sync lock for `target`.
/// Returns the number of directories removed.
pub fn sweep_stale(target: &Path) -> usize {
    let parent = match target.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => return 0,
    };
    let prefix = staging_prefix(target);
    let prefix = prefix.to_string_lossy();

    let Ok(entries) = std::fs::read_dir(parent) else {
        return 0;
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(prefix.as_ref()) {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                log::info!("removed stale clone staging directory {}", entry.path().display());
                removed += 1;
            }
            Err(e) => log::warn!("failed to remove {}: {}", entry.path().display(), e),
        }
    }
    removed
}
