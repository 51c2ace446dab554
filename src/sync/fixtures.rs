//! Local repositories for tests.

use std::path::Path;

use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};

pub(crate) const ED25519_KEY: &[u8] = include_bytes!("testdata/id_ed25519");

/// Non-bare repository with `main` as its initial branch.
pub(crate) fn init_repo(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.initial_head("main");
    Repository::init_opts(path, &opts).expect("Failed to init repository")
}

/// Write `name` in the working tree and commit it on HEAD.
pub(crate) fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) -> Oid {
    let workdir = repo.workdir().expect("Repository should have a workdir");
    let file = workdir.join(name);
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(&file, contents).expect("Failed to write file");

    let mut index = repo.index().expect("Failed to open index");
    index.add_path(Path::new(name)).expect("Failed to stage file");
    index.write().expect("Failed to write index");
    let tree_id = index.write_tree().expect("Failed to write tree");
    let tree = repo.find_tree(tree_id).expect("Failed to find tree");

    let sig = Signature::now("Test", "test@example.com").expect("Failed to build signature");
    let parents: Vec<Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().expect("HEAD should be a commit")],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&Commit<'_>> = parents.iter().collect();

    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .expect("Failed to commit")
}

pub(crate) fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Plain libgit2 clone, bypassing the synchronizer.
pub(crate) fn clone_plain(remote: &Path, dest: &Path) -> Repository {
    Repository::clone(&file_url(remote), dest).expect("Failed to clone")
}

/// Update remote-tracking refs of `origin` without touching the working tree.
pub(crate) fn fetch_origin(repo: &Repository) {
    repo.find_remote("origin")
        .expect("origin should exist")
        .fetch(&[] as &[&str], None, None)
        .expect("Failed to fetch");
}
