//! Network side of a sync: clone and fetch over SSH.

use std::path::Path;
use std::time::{Duration, Instant};

use git2::build::RepoBuilder;
use git2::{
    Cred, CredentialType, Direction, ErrorClass, ErrorCode, FetchOptions, Remote,
    RemoteCallbacks, Repository,
};

use super::error::SyncError;
use super::key::SshKey;
use crate::types::RemoteUrl;

/// SSH user for every connection; hosting services identify by key.
pub const SSH_USER: &str = "git";

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Operations that talk to the remote.
///
/// Implementations must leave `dest` absent or removable on failure and must
/// only update remote-tracking refs when fetching.
pub trait Transport {
    /// Clone `remote` into `dest`, which does not exist yet.
    fn clone_into(&self, remote: &RemoteUrl, dest: &Path, key: &SshKey) -> Result<(), SyncError>;

    /// Fetch `remote_name` into its remote-tracking refs.
    fn fetch(&self, repo: &Repository, remote_name: &str, key: &SshKey) -> Result<(), SyncError>;

    /// Short name of the branch the remote's HEAD points at, or `None` while
    /// the remote has no commits.
    fn default_branch(
        &self,
        repo: &Repository,
        remote_name: &str,
        key: &SshKey,
    ) -> Result<Option<String>, SyncError>;
}

/// libgit2 transport authenticating with an in-memory key.
#[derive(Debug, Default, Clone, Copy)]
pub struct Git2Transport;

impl Git2Transport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for Git2Transport {
    fn clone_into(&self, remote: &RemoteUrl, dest: &Path, key: &SshKey) -> Result<(), SyncError> {
        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks(key));

        let mut builder = RepoBuilder::new();
        builder.fetch_options(fetch_options);
        builder
            .clone(remote.as_str(), dest)
            .map(|_| ())
            .map_err(classify)
    }

    fn fetch(&self, repo: &Repository, remote_name: &str, key: &SshKey) -> Result<(), SyncError> {
        let mut remote = find_remote(repo, remote_name)?;

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(callbacks(key));
        remote
            .fetch::<&str>(&[], Some(&mut fetch_options), None)
            .map_err(classify)
    }

    fn default_branch(
        &self,
        repo: &Repository,
        remote_name: &str,
        key: &SshKey,
    ) -> Result<Option<String>, SyncError> {
        let mut remote = find_remote(repo, remote_name)?;
        let connection = remote
            .connect_auth(Direction::Fetch, Some(callbacks(key)), None)
            .map_err(classify)?;

        // libgit2 reports NotFound when the remote advertises no HEAD.
        let branch = match connection.default_branch() {
            Ok(name) => name
                .as_str()
                .map(|name| name.strip_prefix("refs/heads/").unwrap_or(name).to_string()),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(classify(e)),
        };
        Ok(branch)
    }
}

fn find_remote<'repo>(repo: &'repo Repository, name: &str) -> Result<Remote<'repo>, SyncError> {
    repo.find_remote(name).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            SyncError::NoOrigin
        } else {
            SyncError::Git(e)
        }
    })
}

fn callbacks(key: &SshKey) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();

    let mut key_offered = false;
    callbacks.credentials(move |_url, _username_from_url, allowed| {
        credentials(key, allowed, &mut key_offered)
    });

    let mut last_report: Option<Instant> = None;
    callbacks.transfer_progress(move |stats| {
        let done = stats.received_objects() == stats.total_objects()
            && stats.indexed_deltas() == stats.total_deltas();
        let due = last_report.is_none_or(|t| t.elapsed() >= PROGRESS_INTERVAL);
        if done || due {
            log::debug!(
                "received {}/{} objects ({} bytes), resolved {}/{} deltas",
                stats.received_objects(),
                stats.total_objects(),
                stats.received_bytes(),
                stats.indexed_deltas(),
                stats.total_deltas()
            );
            last_report = Some(Instant::now());
        }
        true
    });

    callbacks.sideband_progress(|data| {
        let text = String::from_utf8_lossy(data);
        let text = text.trim_end();
        if !text.is_empty() {
            log::debug!("remote: {}", text);
        }
        true
    });

    callbacks
}

/// Credential callback: username `git`, then the key exactly once.
///
/// libgit2 calls back again after the server rejects a key; answering with
/// an auth error stops it from retrying forever.
fn credentials(
    key: &SshKey,
    allowed: CredentialType,
    key_offered: &mut bool,
) -> Result<Cred, git2::Error> {
    if allowed.contains(CredentialType::USERNAME) {
        return Cred::username(SSH_USER);
    }

    if allowed.intersects(CredentialType::SSH_KEY | CredentialType::SSH_MEMORY) {
        if *key_offered {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Ssh,
                "ssh key was rejected by the remote",
            ));
        }
        *key_offered = true;
        log::debug!("offering {} key as user {}", key.format().as_str(), SSH_USER);
        return Cred::ssh_key_from_memory(SSH_USER, None, key.pem(), None);
    }

    Err(git2::Error::new(
        ErrorCode::Auth,
        ErrorClass::Net,
        "remote asked for credentials other than an ssh key",
    ))
}

/// Map a libgit2 error from clone or fetch onto a sync failure.
pub fn classify(err: git2::Error) -> SyncError {
    let message = err.message().to_string();
    match err.code() {
        ErrorCode::Auth => return SyncError::AuthFailed(message),
        ErrorCode::Certificate => return SyncError::HostKeyRejected(message),
        _ => {}
    }

    match err.class() {
        ErrorClass::Ssh if mentions_auth(&message) => SyncError::AuthFailed(message),
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Os | ErrorClass::Ssl | ErrorClass::Ssh => {
            SyncError::NetworkFailed(message)
        }
        _ => SyncError::Git(err),
    }
}

/// libssh2 userauth failures. "Failed to retrieve list of SSH authentication
/// methods" is a dropped handshake, not a rejected key.
fn mentions_auth(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    [
        "failed to authenticate",
        "authentication failed",
        "userauth",
        "publickey",
        "public key",
    ]
        .iter()
        .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fixtures::{ED25519_KEY, commit_file, file_url, init_repo};
    use tempfile::tempdir;

    fn key() -> SshKey {
        SshKey::parse(ED25519_KEY).expect("fixture key should parse")
    }

    #[test]
    fn classify_auth_code() {
        let err = git2::Error::new(ErrorCode::Auth, ErrorClass::Ssh, "denied");
        assert!(matches!(classify(err), SyncError::AuthFailed(m) if m == "denied"));
    }

    #[test]
    fn classify_certificate_code() {
        let err = git2::Error::new(
            ErrorCode::Certificate,
            ErrorClass::Ssh,
            "invalid or unknown remote ssh hostkey",
        );
        assert!(matches!(classify(err), SyncError::HostKeyRejected(_)));
    }

    #[test]
    fn classify_ssh_auth_message() {
        let err = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Ssh,
            "Failed to authenticate SSH session: Unable to send userauth-publickey request",
        );
        assert!(matches!(classify(err), SyncError::AuthFailed(_)));
    }

    #[test]
    fn classify_lost_handshake_as_network_failure() {
        let err = git2::Error::new(
            ErrorCode::GenericError,
            ErrorClass::Ssh,
            "Failed to retrieve list of SSH authentication methods: Failed getting response",
        );
        assert!(matches!(classify(err), SyncError::NetworkFailed(_)));
    }

    #[test]
    fn classify_network_classes() {
        for class in [
            ErrorClass::Net,
            ErrorClass::Http,
            ErrorClass::Os,
            ErrorClass::Ssl,
            ErrorClass::Ssh,
        ] {
            let err = git2::Error::new(ErrorCode::GenericError, class, "failed to connect");
            assert!(
                matches!(classify(err), SyncError::NetworkFailed(_)),
                "class {:?} should be a network failure",
                class
            );
        }
    }

    #[test]
    fn classify_other_errors_as_git() {
        let err = git2::Error::new(ErrorCode::NotFound, ErrorClass::Reference, "no such ref");
        assert!(matches!(classify(err), SyncError::Git(_)));
    }

    #[test]
    fn credentials_supply_git_username() {
        let mut key_offered = false;
        let cred = credentials(&key(), CredentialType::USERNAME, &mut key_offered);
        assert!(cred.is_ok(), "USERNAME credential should be handled");
        assert!(!key_offered);
    }

    #[test]
    fn credentials_refuse_second_key_attempt() {
        let mut key_offered = true;
        let err = credentials(&key(), CredentialType::SSH_KEY, &mut key_offered)
            .err()
            .expect("second attempt should fail");
        assert_eq!(err.code(), ErrorCode::Auth);
    }

    #[test]
    fn credentials_reject_password_prompts() {
        let mut key_offered = false;
        let err = credentials(&key(), CredentialType::USER_PASS_PLAINTEXT, &mut key_offered)
            .err()
            .expect("plaintext credentials are not supported");
        assert_eq!(err.code(), ErrorCode::Auth);
    }

    #[test]
    fn clone_into_local_remote() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        let head = commit_file(&remote, "index.html", "A", "A");

        let url: RemoteUrl = file_url(&remote_path).parse().expect("file url should parse");
        let dest = temp_dir.path().join("dest");
        Transport::clone_into(&Git2Transport::new(), &url, &dest, &key()).expect("clone failed");

        let cloned = Repository::open(&dest).expect("clone should be a repository");
        assert_eq!(cloned.head().unwrap().target(), Some(head));
        assert_eq!(std::fs::read_to_string(dest.join("index.html")).unwrap(), "A");
    }

    #[test]
    fn default_branch_of_local_remote() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        let local = init_repo(&temp_dir.path().join("local"));
        local.remote("origin", &file_url(&remote_path)).unwrap();
        let transport = Git2Transport::new();

        assert_eq!(transport.default_branch(&local, "origin", &key()).unwrap(), None);

        commit_file(&remote, "index.html", "A", "A");
        assert_eq!(
            transport.default_branch(&local, "origin", &key()).unwrap(),
            Some("main".to_string())
        );
    }

    #[test]
    fn fetch_without_origin() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());

        assert!(matches!(
            Git2Transport::new().fetch(&repo, "origin", &key()),
            Err(SyncError::NoOrigin)
        ));
    }
}
