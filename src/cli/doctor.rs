//! `doctor`: report what a sync or serve would run into.

use std::fmt;

use secrecy::ExposeSecret;

use crate::config::{self, AppPaths, SyncConfig};
use crate::sync::{SSH_USER, SshKey, WorkingCopy, git, holder_pid, is_held};
use crate::types::{RemoteKind, RemoteUrl};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Info,
    Fail,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Fail => "FAIL",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub status: CheckStatus,
    pub name: &'static str,
    pub detail: String,
}

impl Check {
    fn new(status: CheckStatus, name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            name,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.name, self.detail)
    }
}

/// Run every check against `paths`. Never fails; problems become `Fail` rows.
pub fn run_checks(paths: &AppPaths) -> Vec<Check> {
    let mut checks = Vec::new();

    let config_file = paths.config_file();
    if config_file.exists() {
        checks.push(Check::new(
            CheckStatus::Ok,
            "Config file",
            config_file.display().to_string(),
        ));
    } else {
        checks.push(Check::new(
            CheckStatus::Fail,
            "Config file",
            format!("not found: {}", config_file.display()),
        ));
    }

    match config::load(config_file) {
        Ok(cfg) => {
            checks.push(Check::new(
                CheckStatus::Ok,
                "Config",
                format!("remote {}, listening on {}", cfg.remote(), cfg.listen_addr()),
            ));
            checks.push(remote_check(cfg.remote()));
            checks.push(key_check(&cfg));
        }
        Err(config::ConfigError::Missing(_)) => {}
        Err(e) => checks.push(Check::new(CheckStatus::Fail, "Config", e.to_string())),
    }

    checks.push(ssh_support_check());
    checks.push(working_copy_check(paths));
    checks.push(lock_check(paths));

    checks
}

fn remote_check(remote: &RemoteUrl) -> Check {
    match (remote.kind(), remote.host()) {
        (RemoteKind::File, _) => Check::new(
            CheckStatus::Info,
            "Remote",
            "local repository; the ssh key is not used",
        ),
        (_, Some(host)) => Check::new(
            CheckStatus::Ok,
            "Remote",
            format!("ssh to {} as {}", host, SSH_USER),
        ),
        (_, None) => Check::new(CheckStatus::Fail, "Remote", "no host in remote url"),
    }
}

fn key_check(cfg: &SyncConfig) -> Check {
    match SshKey::parse(cfg.ssh_key().expose_secret().as_bytes()) {
        Ok(key) => Check::new(CheckStatus::Ok, "SSH key", format!("{} key", key.format().as_str())),
        Err(e) => Check::new(CheckStatus::Fail, "SSH key", e.to_string()),
    }
}

fn ssh_support_check() -> Check {
    let version = git2::Version::get();
    let (major, minor, patch) = version.libgit2_version();
    if version.ssh() {
        Check::new(
            CheckStatus::Ok,
            "libgit2",
            format!("{}.{}.{} with SSH support", major, minor, patch),
        )
    } else {
        Check::new(
            CheckStatus::Fail,
            "libgit2",
            format!("{}.{}.{} built without SSH support", major, minor, patch),
        )
    }
}

fn lock_check(paths: &AppPaths) -> Check {
    let lock_file = paths.lock_file();
    match is_held(&lock_file) {
        Ok(false) => Check::new(CheckStatus::Ok, "Sync lock", "free"),
        Ok(true) => Check::new(
            CheckStatus::Info,
            "Sync lock",
            format!(
                "sync in progress (pid {})",
                holder_pid(&lock_file)
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            ),
        ),
        Err(e) => Check::new(
            CheckStatus::Fail,
            "Sync lock",
            format!("{}: {}", lock_file.display(), e),
        ),
    }
}

fn working_copy_check(paths: &AppPaths) -> Check {
    let path = paths.working_copy();
    let state = match git::inspect(path) {
        Ok(state) => state,
        Err(e) => return Check::new(CheckStatus::Fail, "Working copy", e.to_string()),
    };

    match state {
        WorkingCopy::Absent | WorkingCopy::Empty => Check::new(
            CheckStatus::Info,
            "Working copy",
            format!("{} ({}; will be cloned)", path.display(), state.as_str()),
        ),
        WorkingCopy::Foreign => Check::new(
            CheckStatus::Fail,
            "Working copy",
            format!("{} exists but is not a git checkout", path.display()),
        ),
        WorkingCopy::Checkout => {
            let detail = git::open_repository(path).and_then(|repo| {
                let branch = git::head_branch(&repo).unwrap_or_else(|_| "(detached)".into());
                let commit = git::head_commit(&repo)?
                    .map(|oid| oid.to_string().chars().take(7).collect::<String>())
                    .unwrap_or_else(|| "(empty)".into());
                Ok(format!("{} ({} at {})", path.display(), branch, commit))
            });
            match detail {
                Ok(detail) => Check::new(CheckStatus::Ok, "Working copy", detail),
                Err(e) => Check::new(CheckStatus::Fail, "Working copy", e.to_string()),
            }
        }
    }
}
