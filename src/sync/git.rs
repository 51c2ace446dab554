//! Local repository operations using libgit2.
//!
//! Nothing here touches the network; fetch and clone live behind
//! [`super::Transport`].

use std::io;
use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, Oid, Repository, StatusOptions};

use super::error::SyncError;
use super::staging::is_empty_dir;

/// What currently occupies the working copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingCopy {
    /// Nothing exists at the path.
    Absent,
    /// An empty directory; treated like `Absent`.
    Empty,
    /// A non-bare repository whose working directory is the path itself.
    Checkout,
    /// Something else: a file, a populated directory without its own
    /// repository, or a bare repository.
    Foreign,
}

impl WorkingCopy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Empty => "empty",
            Self::Checkout => "checkout",
            Self::Foreign => "foreign",
        }
    }
}

/// Classify the working copy path by its repository metadata.
pub fn inspect(path: &Path) -> Result<WorkingCopy, SyncError> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(WorkingCopy::Absent),
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Ok(WorkingCopy::Foreign);
    }
    if is_empty_dir(path)? {
        return Ok(WorkingCopy::Empty);
    }

    // `open` does not search parent directories, so a plain directory inside
    // some other checkout is still foreign.
    let repo = match Repository::open(path) {
        Ok(repo) => repo,
        Err(e) if e.code() == ErrorCode::NotFound => return Ok(WorkingCopy::Foreign),
        Err(e) => return Err(e.into()),
    };
    let Some(workdir) = repo.workdir() else {
        return Ok(WorkingCopy::Foreign);
    };
    if workdir.canonicalize()? == path.canonicalize()? {
        Ok(WorkingCopy::Checkout)
    } else {
        Ok(WorkingCopy::Foreign)
    }
}

/// Open an existing checkout.
pub fn open_repository(path: &Path) -> Result<Repository, SyncError> {
    Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            SyncError::NotARepository(path.to_path_buf())
        } else {
            SyncError::Git(e)
        }
    })
}

/// Short name of the branch HEAD points at. Works on unborn branches.
pub fn head_branch(repo: &Repository) -> Result<String, SyncError> {
    let head = repo.find_reference("HEAD")?;
    head.symbolic_target()
        .and_then(|target| target.strip_prefix("refs/heads/"))
        .map(str::to_string)
        .ok_or(SyncError::DetachedHead)
}

/// Commit HEAD resolves to, or `None` on an unborn branch.
pub fn head_commit(repo: &Repository) -> Result<Option<Oid>, SyncError> {
    match repo.head() {
        Ok(head) => Ok(head.target()),
        Err(e) if e.code() == ErrorCode::UnbornBranch => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// True when `refs/remotes/<remote_name>/<branch>` exists.
pub fn has_remote_branch(
    repo: &Repository,
    remote_name: &str,
    branch: &str,
) -> Result<bool, SyncError> {
    match repo.find_reference(&format!("refs/remotes/{}/{}", remote_name, branch)) {
        Ok(_) => Ok(true),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Point HEAD at `branch` while the checkout has no commits yet.
pub fn switch_unborn_branch(repo: &Repository, branch: &str) -> Result<(), SyncError> {
    if head_commit(repo)?.is_some() {
        return Err(SyncError::Git(git2::Error::from_str(
            "refusing to switch branches on a checkout with commits",
        )));
    }
    repo.set_head(&format!("refs/heads/{}", branch))?;
    Ok(())
}

/// True when tracked files differ from HEAD. Untracked files are ignored.
pub fn is_worktree_dirty(repo: &Repository) -> Result<bool, git2::Error> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(false)
        .include_ignored(false)
        .exclude_submodules(true);
    let statuses = repo.statuses(Some(&mut opts))?;
    Ok(!statuses.is_empty())
}

/// Result of moving a local branch onto its remote-tracking branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastForward {
    /// The local branch already contains the remote commit.
    UpToDate(Option<Oid>),
    /// The branch, index and working tree moved to `to`.
    Advanced { from: Option<Oid>, to: Oid },
}

/// Fast-forward `branch` to `refs/remotes/<remote_name>/<branch>`.
///
/// Never merges or rebases; diverged history and local modifications are
/// errors, and the working tree is untouched when an error is returned.
pub fn fast_forward(
    repo: &Repository,
    remote_name: &str,
    branch: &str,
) -> Result<FastForward, SyncError> {
    let remote_ref = format!("refs/remotes/{}/{}", remote_name, branch);
    let fetched = repo.find_reference(&remote_ref).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            SyncError::UpstreamMissing(format!("{}/{}", remote_name, branch))
        } else {
            SyncError::Git(e)
        }
    })?;
    let fetch_commit = repo.reference_to_annotated_commit(&fetched)?;
    let target = fetch_commit.id();
    let local_ref = format!("refs/heads/{}", branch);

    let (analysis, _) = repo.merge_analysis(&[&fetch_commit])?;

    if analysis.is_up_to_date() {
        return Ok(FastForward::UpToDate(head_commit(repo)?));
    }
    if !analysis.is_unborn() && !analysis.is_fast_forward() {
        return Err(SyncError::Diverged {
            branch: branch.to_string(),
        });
    }

    if is_worktree_dirty(repo)? {
        return Err(SyncError::DirtyWorkingTree);
    }
    let from = head_commit(repo)?;
    checkout_commit(repo, target)?;
    repo.reference(&local_ref, target, true, "fast-forward")?;
    repo.set_head(&local_ref)?;
    log::debug!("moved {} to {}", branch, target);

    Ok(FastForward::Advanced { from, to: target })
}

/// Update index and working tree to `target` without overwriting anything
/// local: modified or untracked files in the way fail the checkout before a
/// single file is written.
fn checkout_commit(repo: &Repository, target: Oid) -> Result<(), SyncError> {
    let commit = repo.find_commit(target)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.safe();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))
        .map_err(|e| {
            if e.code() == ErrorCode::Conflict {
                log::warn!("checkout of {} blocked by local files: {}", target, e.message());
                SyncError::DirtyWorkingTree
            } else {
                SyncError::Git(e)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fixtures::{clone_plain, commit_file, fetch_origin, init_repo};
    use tempfile::tempdir;

    #[test]
    fn inspect_absent_path() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let path = temp_dir.path().join("nonexistent");

        assert_eq!(inspect(&path).expect("inspect failed"), WorkingCopy::Absent);
    }

    #[test]
    fn inspect_empty_directory() {
        let temp_dir = tempdir().expect("Failed to create temp directory");

        assert_eq!(
            inspect(temp_dir.path()).expect("inspect failed"),
            WorkingCopy::Empty
        );
    }

    #[test]
    fn inspect_plain_directory_is_foreign() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        std::fs::write(temp_dir.path().join("index.html"), "hi").unwrap();

        assert_eq!(
            inspect(temp_dir.path()).expect("inspect failed"),
            WorkingCopy::Foreign
        );
    }

    #[test]
    fn inspect_file_is_foreign() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let file = temp_dir.path().join("site");
        std::fs::write(&file, "not a directory").unwrap();

        assert_eq!(inspect(&file).expect("inspect failed"), WorkingCopy::Foreign);
    }

    #[test]
    fn inspect_subdirectory_of_checkout_is_foreign() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "docs/index.html", "hi", "initial");

        assert_eq!(
            inspect(&temp_dir.path().join("docs")).expect("inspect failed"),
            WorkingCopy::Foreign
        );
    }

    #[test]
    fn inspect_bare_repository_is_foreign() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        Repository::init_bare(temp_dir.path()).unwrap();

        assert_eq!(
            inspect(temp_dir.path()).expect("inspect failed"),
            WorkingCopy::Foreign
        );
    }

    #[test]
    fn inspect_checkout() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        init_repo(temp_dir.path());

        assert_eq!(
            inspect(temp_dir.path()).expect("inspect failed"),
            WorkingCopy::Checkout
        );
    }

    #[test]
    fn open_repository_not_found() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let nonexistent = temp_dir.path().join("nonexistent");

        match open_repository(&nonexistent) {
            Err(SyncError::NotARepository(path)) => assert_eq!(path, nonexistent),
            other => panic!("Expected NotARepository error, got: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn head_branch_on_unborn_and_born_repo() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());

        assert_eq!(head_branch(&repo).unwrap(), "main");
        assert_eq!(head_commit(&repo).unwrap(), None);

        let oid = commit_file(&repo, "a.txt", "a", "initial");
        assert_eq!(head_branch(&repo).unwrap(), "main");
        assert_eq!(head_commit(&repo).unwrap(), Some(oid));
    }

    #[test]
    fn head_branch_detached() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());
        let oid = commit_file(&repo, "a.txt", "a", "initial");
        repo.set_head_detached(oid).unwrap();

        assert!(matches!(head_branch(&repo), Err(SyncError::DetachedHead)));
    }

    #[test]
    fn dirty_ignores_untracked_files() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");

        std::fs::write(temp_dir.path().join("untracked.txt"), "x").unwrap();
        assert!(!is_worktree_dirty(&repo).unwrap());

        std::fs::write(temp_dir.path().join("a.txt"), "changed").unwrap();
        assert!(is_worktree_dirty(&repo).unwrap());
    }

    #[test]
    fn fast_forward_advances_to_remote() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        let first = commit_file(&remote, "index.html", "A", "A");

        let local_path = temp_dir.path().join("local");
        let local = clone_plain(&remote_path, &local_path);

        let second = commit_file(&remote, "index.html", "B", "B");
        fetch_origin(&local);

        let result = fast_forward(&local, "origin", "main").expect("fast-forward failed");
        assert_eq!(
            result,
            FastForward::Advanced {
                from: Some(first),
                to: second
            }
        );
        assert_eq!(
            std::fs::read_to_string(local_path.join("index.html")).unwrap(),
            "B"
        );
        assert_eq!(head_commit(&local).unwrap(), Some(second));
    }

    #[test]
    fn fast_forward_up_to_date() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        let first = commit_file(&remote, "index.html", "A", "A");

        let local = clone_plain(&remote_path, &temp_dir.path().join("local"));
        fetch_origin(&local);

        assert_eq!(
            fast_forward(&local, "origin", "main").unwrap(),
            FastForward::UpToDate(Some(first))
        );
    }

    #[test]
    fn fast_forward_refuses_dirty_tree() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        commit_file(&remote, "index.html", "A", "A");

        let local_path = temp_dir.path().join("local");
        let local = clone_plain(&remote_path, &local_path);
        std::fs::write(local_path.join("index.html"), "local edit").unwrap();

        commit_file(&remote, "index.html", "B", "B");
        fetch_origin(&local);

        assert!(matches!(
            fast_forward(&local, "origin", "main"),
            Err(SyncError::DirtyWorkingTree)
        ));
        assert_eq!(
            std::fs::read_to_string(local_path.join("index.html")).unwrap(),
            "local edit"
        );
    }

    #[test]
    fn fast_forward_keeps_untracked_file_in_the_way() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        let first = commit_file(&remote, "index.html", "A", "A");

        let local_path = temp_dir.path().join("local");
        let local = clone_plain(&remote_path, &local_path);
        std::fs::write(local_path.join("notes.html"), "local only").unwrap();

        commit_file(&remote, "notes.html", "from remote", "notes");
        fetch_origin(&local);

        assert!(matches!(
            fast_forward(&local, "origin", "main"),
            Err(SyncError::DirtyWorkingTree)
        ));
        assert_eq!(
            std::fs::read_to_string(local_path.join("notes.html")).unwrap(),
            "local only"
        );
        assert_eq!(head_commit(&local).unwrap(), Some(first));
    }

    #[test]
    fn fast_forward_keeps_unrelated_untracked_files() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        commit_file(&remote, "index.html", "A", "A");

        let local_path = temp_dir.path().join("local");
        let local = clone_plain(&remote_path, &local_path);
        std::fs::write(local_path.join("drafts.txt"), "mine").unwrap();

        let second = commit_file(&remote, "index.html", "B", "B");
        fetch_origin(&local);

        assert!(matches!(
            fast_forward(&local, "origin", "main"),
            Ok(FastForward::Advanced { to, .. }) if to == second
        ));
        assert_eq!(std::fs::read_to_string(local_path.join("drafts.txt")).unwrap(), "mine");
        assert_eq!(std::fs::read_to_string(local_path.join("index.html")).unwrap(), "B");
    }

    #[test]
    fn switch_unborn_branch_retargets_head() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());

        switch_unborn_branch(&repo, "pages").unwrap();
        assert_eq!(head_branch(&repo).unwrap(), "pages");
        assert!(!has_remote_branch(&repo, "origin", "pages").unwrap());

        commit_file(&repo, "a.txt", "a", "initial");
        assert!(switch_unborn_branch(&repo, "main").is_err());
        assert_eq!(head_branch(&repo).unwrap(), "pages");
    }

    #[test]
    fn fast_forward_refuses_diverged_history() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);
        commit_file(&remote, "index.html", "A", "A");

        let local_path = temp_dir.path().join("local");
        let local = clone_plain(&remote_path, &local_path);
        let local_commit = commit_file(&local, "local.txt", "L", "local");

        commit_file(&remote, "index.html", "B", "B");
        fetch_origin(&local);

        match fast_forward(&local, "origin", "main") {
            Err(SyncError::Diverged { branch }) => assert_eq!(branch, "main"),
            other => panic!("Expected Diverged error, got: {:?}", other),
        }
        assert_eq!(head_commit(&local).unwrap(), Some(local_commit));
    }

    #[test]
    fn fast_forward_missing_upstream() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let repo = init_repo(temp_dir.path());
        commit_file(&repo, "a.txt", "a", "initial");

        match fast_forward(&repo, "origin", "main") {
            Err(SyncError::UpstreamMissing(name)) => assert_eq!(name, "origin/main"),
            other => panic!("Expected UpstreamMissing error, got: {:?}", other),
        }
    }

    #[test]
    fn fast_forward_onto_unborn_branch() {
        let temp_dir = tempdir().expect("Failed to create temp directory");
        let remote_path = temp_dir.path().join("remote");
        let remote = init_repo(&remote_path);

        let local_path = temp_dir.path().join("local");
        let local = init_repo(&local_path);
        local
            .remote("origin", &crate::sync::fixtures::file_url(&remote_path))
            .unwrap();

        let first = commit_file(&remote, "index.html", "A", "A");
        fetch_origin(&local);

        assert_eq!(
            fast_forward(&local, "origin", "main").unwrap(),
            FastForward::Advanced {
                from: None,
                to: first
            }
        );
        assert_eq!(
            std::fs::read_to_string(local_path.join("index.html")).unwrap(),
            "A"
        );
    }
}
