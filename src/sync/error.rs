use std::path::PathBuf;

use thiserror::Error;

use super::key::KeyError;

/// Reasons a sync attempt can fail.
///
/// "Already up to date" is not an error; see [`super::SyncOutcome`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// The SSH key could not be derived from the supplied material.
    #[error("invalid ssh key: {0}")]
    InvalidKey(#[from] KeyError),
    /// The remote refused the key.
    #[error("ssh authentication failed: {0}")]
    AuthFailed(String),
    /// The remote host key is unknown or does not match known_hosts.
    #[error("ssh host key rejected: {0}")]
    HostKeyRejected(String),
    /// The remote could not be reached or the connection dropped.
    #[error("network failure: {0}")]
    NetworkFailed(String),
    /// The working copy exists but holds no checkout of its own.
    #[error("{0} exists but is not a git checkout")]
    NotARepository(PathBuf),
    /// HEAD does not point at a branch.
    #[error("HEAD is detached; refusing to pull")]
    DetachedHead,
    /// The checkout has no `origin` remote to pull from.
    #[error("repository has no 'origin' remote")]
    NoOrigin,
    /// The fetched remote has no branch matching the local one.
    #[error("remote branch {0} does not exist")]
    UpstreamMissing(String),
    /// Tracked files were modified locally.
    #[error("working tree has uncommitted changes; refusing to overwrite")]
    DirtyWorkingTree,
    /// Local and remote history diverged; a fast-forward is impossible.
    #[error("branch {branch} has diverged from origin; fast-forward impossible")]
    Diverged { branch: String },
    /// Another process kept the working copy locked for too long.
    #[error("timed out waiting for another sync of {0}")]
    LockTimeout(PathBuf),
    /// The working copy path has no final component.
    #[error("invalid working copy path: {0}")]
    InvalidTarget(PathBuf),
    /// A local libgit2 operation failed.
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    /// Underlying IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
