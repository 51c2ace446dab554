use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;

use git2::Oid;

use super::error::SyncError;
use super::git::{self, FastForward, WorkingCopy};
use super::key::SshKey;
use super::lock::{DEFAULT_LOCK_TIMEOUT, SyncLock};
use super::staging::{StagingDir, sweep_stale};
use super::transport::{Git2Transport, Transport};
use crate::config::lock_path_for;
use crate::types::RemoteUrl;

/// Remote every pull fetches from.
pub const ORIGIN: &str = "origin";

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The working copy was created. Both fields are `None` for an empty
    /// remote, whose branch is picked up by the first pull that sees a commit.
    Cloned {
        branch: Option<String>,
        commit: Option<Oid>,
    },
    /// The checkout was fast-forwarded.
    Pulled {
        branch: String,
        from: Option<Oid>,
        to: Oid,
    },
    /// The checkout already had everything the remote has.
    UpToDate {
        branch: String,
        commit: Option<Oid>,
    },
}

fn short(oid: &Option<Oid>) -> String {
    match oid {
        Some(oid) => oid.to_string().chars().take(7).collect(),
        None => "(empty)".to_string(),
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloned { branch, commit } => write!(
                f,
                "cloned {} at {}",
                branch.as_deref().unwrap_or("(no branch)"),
                short(commit)
            ),
            Self::Pulled { branch, from, to } => {
                write!(f, "pulled {}: {} -> {}", branch, short(from), short(&Some(*to)))
            }
            Self::UpToDate { branch, commit } => {
                write!(f, "{} already up to date at {}", branch, short(commit))
            }
        }
    }
}

/// Brings a working copy in line with its remote: clone when absent, pull
/// when present.
#[derive(Debug)]
pub struct Synchronizer<T = Git2Transport> {
    transport: T,
    lock_timeout: Duration,
}

impl Synchronizer<Git2Transport> {
    pub fn new() -> Self {
        Self::with_transport(Git2Transport::new())
    }
}

impl Default for Synchronizer<Git2Transport> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Transport> Synchronizer<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// How long to wait for a concurrent sync of the same working copy.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Clone `remote` into `target`, or fast-forward the checkout already
    /// there.
    ///
    /// The key is derived before anything else, so malformed material never
    /// reaches the filesystem or the network. Failures leave `target` as it
    /// was: absent after a failed clone, untouched after a failed pull.
    pub fn ensure_synced(
        &self,
        remote: &RemoteUrl,
        key_material: &[u8],
        target: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        let key = SshKey::parse(key_material)?;
        if target.file_name().is_none() {
            return Err(SyncError::InvalidTarget(target.to_path_buf()));
        }

        let _lock = SyncLock::acquire_with_timeout(&lock_path_for(target), self.lock_timeout)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::TimedOut {
                    SyncError::LockTimeout(target.to_path_buf())
                } else {
                    SyncError::Io(e)
                }
            })?;

        let state = git::inspect(target)?;
        log::debug!("working copy {} is {}", target.display(), state.as_str());

        match state {
            WorkingCopy::Absent | WorkingCopy::Empty => self.initial_clone(remote, &key, target),
            WorkingCopy::Checkout => self.pull(&key, target),
            WorkingCopy::Foreign => Err(SyncError::NotARepository(target.to_path_buf())),
        }
    }

    fn initial_clone(
        &self,
        remote: &RemoteUrl,
        key: &SshKey,
        target: &Path,
    ) -> Result<SyncOutcome, SyncError> {
        sweep_stale(target);
        let staging = StagingDir::new(target)?;

        log::info!("cloning {} into {}", remote, target.display());
        if !remote.is_ssh() {
            log::debug!("{} is a local remote; the ssh key is not offered", remote);
        }
        self.transport.clone_into(remote, staging.path(), key)?;

        let (branch, commit) = {
            let repo = git::open_repository(staging.path())?;
            match git::head_commit(&repo)? {
                Some(commit) => (git::head_branch(&repo).ok(), Some(commit)),
                None => (None, None),
            }
        };
        staging.commit()?;

        Ok(SyncOutcome::Cloned { branch, commit })
    }

    fn pull(&self, key: &SshKey, target: &Path) -> Result<SyncOutcome, SyncError> {
        let repo = git::open_repository(target)?;
        let mut branch = git::head_branch(&repo)?;

        log::info!("pulling {} from {} into {}", branch, ORIGIN, target.display());
        self.transport.fetch(&repo, ORIGIN, key)?;

        // A clone of an empty remote sits on libgit2's default branch name,
        // which need not be the one the remote grows.
        if git::head_commit(&repo)?.is_none() && !git::has_remote_branch(&repo, ORIGIN, &branch)? {
            match self.transport.default_branch(&repo, ORIGIN, key)? {
                None => return Ok(SyncOutcome::UpToDate { branch, commit: None }),
                Some(remote_branch) if remote_branch != branch => {
                    log::info!("following the remote's default branch {}", remote_branch);
                    git::switch_unborn_branch(&repo, &remote_branch)?;
                    branch = remote_branch;
                }
                Some(_) => {}
            }
        }

        match git::fast_forward(&repo, ORIGIN, &branch)? {
            FastForward::UpToDate(commit) => Ok(SyncOutcome::UpToDate { branch, commit }),
            FastForward::Advanced { from, to } => Ok(SyncOutcome::Pulled { branch, from, to }),
        }
    }
}
