//! Local clone management and branch-tip enumeration.
//!
//! All worktree updates (`clone`/`pull`) are serialized by a process-wide
//! mutex: the clone is shared between every per-host reconciler and only
//! one update may be in flight at a time.

use chrono::{DateTime, TimeZone, Utc};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{
    CertificateCheckStatus, Commit, Cred, FetchOptions, ObjectType, RemoteCallbacks, Repository,
    TreeWalkMode, TreeWalkResult,
};
use parking_lot::Mutex;

use nginxops_core::config::{GitAuthConfig, GitAuthKind, GitConfig};
use nginxops_core::ignore::is_ignored;

use crate::error::{io_err, SyncError};

static REPO_LOCK: Mutex<()> = Mutex::new(());

/// One blob from the branch-tip tree, path relative to the host's config
/// subtree.
#[derive(Debug, Clone)]
pub struct TreeFile {
    pub rel_path: String,
    pub bytes: Vec<u8>,
}

/// Branch-tip enumeration result.
#[derive(Debug, Clone)]
pub struct BranchTree {
    pub commit: String,
    /// Trimmed first line of the tip commit message.
    pub message: String,
    pub files: Vec<TreeFile>,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Local HEAD vs `origin/<branch>`.
#[derive(Debug, Clone)]
pub struct RepoStatus {
    pub branch: String,
    pub local: CommitInfo,
    pub remote: Option<CommitInfo>,
    /// `synced`, `ahead`, `behind`, `diverged`, or `error`.
    pub relation: String,
    /// Textual patch remote → local when the two diverge.
    pub diff: Option<String>,
    pub error: Option<String>,
}

/// Ensure the local clone exists and its branch matches the origin tip.
///
/// Clones when the path is missing; a path that exists but is not a
/// repository is removed and re-cloned. Pulls force the configured branch to
/// the fetched origin tip.
pub fn sync_repository(cfg: &GitConfig) -> Result<Repository, SyncError> {
    let _guard = REPO_LOCK.lock();

    let branch = cfg.branch_or_default();
    if !cfg.repo_path.exists() {
        return clone_repository(cfg, branch);
    }

    let repo = match Repository::open(&cfg.repo_path) {
        Ok(repo) => repo,
        Err(err) => {
            tracing::warn!(
                path = %cfg.repo_path.display(),
                error = %err,
                "path exists but is not a repository, removing and re-cloning",
            );
            std::fs::remove_dir_all(&cfg.repo_path).map_err(|e| io_err(&cfg.repo_path, e))?;
            return clone_repository(cfg, branch);
        }
    };

    pull(&repo, cfg, branch)?;
    Ok(repo)
}

/// Open the local clone without touching the network.
pub fn open_repository(cfg: &GitConfig) -> Result<Repository, SyncError> {
    Ok(Repository::open(&cfg.repo_path)?)
}

fn clone_repository(cfg: &GitConfig, branch: &str) -> Result<Repository, SyncError> {
    tracing::info!(url = %cfg.repo_url, path = %cfg.repo_path.display(), branch, "cloning repository");
    let mut fetch = FetchOptions::new();
    fetch.remote_callbacks(remote_callbacks(&cfg.auth)?);
    let repo = RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch)
        .clone(&cfg.repo_url, &cfg.repo_path)?;
    Ok(repo)
}

fn pull(repo: &Repository, cfg: &GitConfig, branch: &str) -> Result<(), SyncError> {
    {
        let mut remote = repo.find_remote("origin")?;
        let mut fetch = FetchOptions::new();
        fetch.remote_callbacks(remote_callbacks(&cfg.auth)?);
        // An explicit destination keeps the tracking ref current even when
        // libgit2 would otherwise stop at FETCH_HEAD.
        let refspec = format!("+refs/heads/{branch}:refs/remotes/origin/{branch}");
        remote.fetch(&[refspec.as_str()], Some(&mut fetch), None)?;
    }

    let remote_ref = repo.find_reference(&format!("refs/remotes/origin/{branch}"))?;
    let tip = remote_ref.peel_to_commit()?;
    let tip_id = tip.id();
    drop(remote_ref);

    // Force the local branch to the fetched tip and check it out. The ref is
    // moved directly because the branch may be the checked-out HEAD.
    let refname = format!("refs/heads/{branch}");
    match repo.find_reference(&refname) {
        Ok(mut reference) => {
            reference.set_target(tip_id, "pull: force branch to origin tip")?;
        }
        Err(_) => {
            repo.reference(&refname, tip_id, true, "pull: create branch at origin tip")?;
        }
    }
    repo.set_head(&refname)?;
    repo.checkout_head(Some(CheckoutBuilder::new().force()))?;
    Ok(())
}

fn remote_callbacks(auth: &GitAuthConfig) -> Result<RemoteCallbacks<'static>, SyncError> {
    let mut callbacks = RemoteCallbacks::new();
    match auth.kind {
        GitAuthKind::Basic => {
            let username = auth.username.clone();
            let password = auth.password.clone();
            callbacks.credentials(move |_url, _user, _allowed| {
                Cred::userpass_plaintext(&username, &password)
            });
        }
        GitAuthKind::Ssh => {
            let key_path = auth.private_key_path.clone().ok_or_else(|| {
                SyncError::Auth("ssh git auth requires a private_key_path".to_string())
            })?;
            callbacks.credentials(move |_url, username, _allowed| {
                Cred::ssh_key(username.unwrap_or("git"), None, &key_path, None)
            });
        }
        GitAuthKind::None => {}
    }
    // Host-key verification is skipped; production should pin a known key.
    callbacks.certificate_check(|_cert, _host| Ok(CertificateCheckStatus::CertificateOk));
    Ok(callbacks)
}

/// Enumerate every blob at the branch tip whose path lives under
/// `<subtree>/`, returning paths relative to that subtree. Unreadable blobs
/// are skipped with a log so one bad object never blocks the pass.
pub fn branch_tree_files(
    repo: &Repository,
    branch: &str,
    subtree: &str,
    ignore_patterns: &[String],
) -> Result<BranchTree, SyncError> {
    let reference = repo.find_reference(&format!("refs/heads/{branch}"))?;
    let commit = reference.peel_to_commit()?;
    let tree = commit.tree()?;

    let wanted = format!("{}/", subtree.trim_matches('/'));
    let mut files = Vec::new();

    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() != Some(ObjectType::Blob) {
            return TreeWalkResult::Ok;
        }
        let Some(name) = entry.name() else {
            return TreeWalkResult::Ok;
        };
        let path = format!("{root}{name}");
        if is_ignored(&path, ignore_patterns) {
            return TreeWalkResult::Ok;
        }
        let Some(rel) = path.strip_prefix(&wanted) else {
            return TreeWalkResult::Ok;
        };
        if rel.is_empty() {
            return TreeWalkResult::Ok;
        }
        match repo.find_blob(entry.id()) {
            Ok(blob) => files.push(TreeFile {
                rel_path: rel.to_string(),
                bytes: blob.content().to_vec(),
            }),
            Err(err) => {
                tracing::error!(path = %path, error = %err, "failed to read blob from branch tree");
            }
        }
        TreeWalkResult::Ok
    })?;

    Ok(BranchTree {
        commit: commit.id().to_string(),
        message: commit.summary().unwrap_or("").trim().to_string(),
        files,
    })
}

/// Compare local HEAD with the remote-tracking branch.
pub fn repo_status(cfg: &GitConfig) -> Result<RepoStatus, SyncError> {
    let repo = open_repository(cfg)?;
    let branch = cfg.branch_or_default().to_string();

    let head = repo.head()?.peel_to_commit()?;
    let local = commit_info(&head);

    let remote_ref = repo.find_reference(&format!("refs/remotes/origin/{branch}"));
    let Ok(remote_ref) = remote_ref else {
        return Ok(RepoStatus {
            branch,
            local,
            remote: None,
            relation: "error".to_string(),
            diff: None,
            error: Some(
                "remote tracking reference not found; ensure the repository is synced".to_string(),
            ),
        });
    };
    let remote_commit = remote_ref.peel_to_commit()?;

    let relation = if head.id() == remote_commit.id() {
        "synced"
    } else {
        match repo.graph_ahead_behind(head.id(), remote_commit.id()) {
            Ok((ahead, behind)) => match (ahead > 0, behind > 0) {
                (true, false) => "ahead",
                (false, true) => "behind",
                _ => "diverged",
            },
            Err(_) => "error",
        }
    };

    let diff = if relation == "synced" {
        None
    } else {
        Some(patch_between(&repo, &remote_commit, &head)?)
    };

    Ok(RepoStatus {
        branch,
        local,
        remote: Some(commit_info(&remote_commit)),
        relation: relation.to_string(),
        diff,
        error: None,
    })
}

fn commit_info(commit: &Commit<'_>) -> CommitInfo {
    let author = commit.author();
    CommitInfo {
        hash: commit.id().to_string(),
        message: commit.message().unwrap_or("").to_string(),
        author: author.name().unwrap_or("").to_string(),
        timestamp: Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_default(),
    }
}

fn patch_between(
    repo: &Repository,
    from: &Commit<'_>,
    to: &Commit<'_>,
) -> Result<String, SyncError> {
    let diff = repo.diff_tree_to_tree(Some(&from.tree()?), Some(&to.tree()?), None)?;
    let mut text = String::new();
    diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
        match line.origin() {
            '+' | '-' | ' ' => text.push(line.origin()),
            _ => {}
        }
        text.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;
    Ok(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use git2::{RepositoryInitOptions, Signature};
    use tempfile::TempDir;

    use super::*;

    fn init_repo(path: &Path) -> Repository {
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head("master");
        Repository::init_opts(path, &opts).expect("init repo")
    }

    fn commit_file(repo: &Repository, rel: &str, content: &str, message: &str) {
        let workdir = repo.workdir().expect("workdir");
        let full = workdir.join(rel);
        fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        fs::write(&full, content).expect("write");

        let mut index = repo.index().expect("index");
        index.add_path(Path::new(rel)).expect("add");
        index.write().expect("index write");
        let tree_id = index.write_tree().expect("write tree");
        let tree = repo.find_tree(tree_id).expect("find tree");

        let sig = Signature::now("tester", "tester@example.com").expect("sig");
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("commit");
    }

    fn git_config(url: &Path, clone_to: &Path) -> GitConfig {
        GitConfig {
            repo_url: url.display().to_string(),
            repo_path: clone_to.to_path_buf(),
            branch: "master".to_string(),
            auth: GitAuthConfig::default(),
        }
    }

    #[test]
    fn branch_tree_files_enumerates_the_config_subtree() {
        let dir = TempDir::new().expect("dir");
        let repo = init_repo(dir.path());
        commit_file(
            &repo,
            "webA/10.0.0.1/conf/nginx.conf",
            "server {}",
            "initial config",
        );
        commit_file(
            &repo,
            "webA/10.0.0.1/conf/sites/a.conf",
            "upstream {}",
            "add site",
        );
        commit_file(&repo, "webB/10.0.0.2/conf/other.conf", "x", "other host");
        commit_file(&repo, "webA/10.0.0.1/conf/.hidden", "secret", "hidden");

        let tree =
            branch_tree_files(&repo, "master", "webA/10.0.0.1/conf", &[]).expect("tree files");

        let mut rels: Vec<&str> = tree.files.iter().map(|f| f.rel_path.as_str()).collect();
        rels.sort();
        assert_eq!(rels, vec!["nginx.conf", "sites/a.conf"]);

        let nginx = tree
            .files
            .iter()
            .find(|f| f.rel_path == "nginx.conf")
            .expect("nginx.conf");
        assert_eq!(nginx.bytes, b"server {}".to_vec());

        let head = repo.head().expect("head").peel_to_commit().expect("commit");
        assert_eq!(tree.commit, head.id().to_string());
        assert_eq!(tree.message, "hidden");
    }

    #[test]
    fn branch_tree_respects_ignore_patterns() {
        let dir = TempDir::new().expect("dir");
        let repo = init_repo(dir.path());
        commit_file(&repo, "g/h/conf/nginx.conf", "a", "one");
        commit_file(&repo, "g/h/conf/nginx.conf.bak", "b", "two");

        let tree = branch_tree_files(&repo, "master", "g/h/conf", &["*.bak".to_string()])
            .expect("tree files");
        assert_eq!(tree.files.len(), 1);
        assert_eq!(tree.files[0].rel_path, "nginx.conf");
    }

    #[test]
    fn missing_branch_is_an_error() {
        let dir = TempDir::new().expect("dir");
        let repo = init_repo(dir.path());
        commit_file(&repo, "a.conf", "x", "msg");
        let err = branch_tree_files(&repo, "release", "g/h/conf", &[]).expect_err("no branch");
        assert!(matches!(err, SyncError::Git(_)));
    }

    #[test]
    fn sync_repository_clones_then_pulls() {
        let origin_dir = TempDir::new().expect("origin");
        let origin = init_repo(origin_dir.path());
        commit_file(&origin, "g/h/conf/nginx.conf", "v1", "v1");

        let clone_root = TempDir::new().expect("clone root");
        let clone_path = clone_root.path().join("repo");
        let cfg = git_config(origin_dir.path(), &clone_path);

        // First call clones.
        let cloned = sync_repository(&cfg).expect("clone");
        let tree = branch_tree_files(&cloned, "master", "g/h/conf", &[]).expect("tree");
        assert_eq!(tree.files[0].bytes, b"v1".to_vec());
        drop(cloned);

        // A new commit upstream is picked up by the pull.
        commit_file(&origin, "g/h/conf/nginx.conf", "v2", "v2");
        let pulled = sync_repository(&cfg).expect("pull");
        let tree = branch_tree_files(&pulled, "master", "g/h/conf", &[]).expect("tree");
        assert_eq!(tree.files[0].bytes, b"v2".to_vec());
        assert_eq!(tree.message, "v2");
    }

    #[test]
    fn sync_repository_replaces_a_non_repo_path() {
        let origin_dir = TempDir::new().expect("origin");
        let origin = init_repo(origin_dir.path());
        commit_file(&origin, "g/h/conf/nginx.conf", "v1", "v1");

        let clone_root = TempDir::new().expect("clone root");
        let clone_path = clone_root.path().join("repo");
        fs::create_dir_all(&clone_path).expect("mkdir");
        fs::write(clone_path.join("junk.txt"), "not a repo").expect("junk");

        let cfg = git_config(origin_dir.path(), &clone_path);
        let repo = sync_repository(&cfg).expect("re-clone");
        assert!(repo.workdir().expect("workdir").join("g").exists());
        assert!(!clone_path.join("junk.txt").exists());
    }

    #[test]
    fn repo_status_reports_synced_then_ahead() {
        let origin_dir = TempDir::new().expect("origin");
        let origin = init_repo(origin_dir.path());
        commit_file(&origin, "a.conf", "x", "base");

        let clone_root = TempDir::new().expect("clone root");
        let clone_path = clone_root.path().join("repo");
        let cfg = git_config(origin_dir.path(), &clone_path);
        let clone = sync_repository(&cfg).expect("clone");

        let status = repo_status(&cfg).expect("status");
        assert_eq!(status.relation, "synced");
        assert!(status.diff.is_none());
        assert_eq!(
            status.remote.as_ref().expect("remote").hash,
            status.local.hash
        );

        commit_file(&clone, "b.conf", "y", "local work");
        let status = repo_status(&cfg).expect("status");
        assert_eq!(status.relation, "ahead");
        let diff = status.diff.expect("diff");
        assert!(diff.contains("b.conf"), "patch should mention the new file");
    }

    #[test]
    fn repo_status_reports_behind_after_remote_commit() {
        let origin_dir = TempDir::new().expect("origin");
        let origin = init_repo(origin_dir.path());
        commit_file(&origin, "a.conf", "x", "base");

        let clone_root = TempDir::new().expect("clone root");
        let clone_path = clone_root.path().join("repo");
        let cfg = git_config(origin_dir.path(), &clone_path);
        let clone = sync_repository(&cfg).expect("clone");

        commit_file(&origin, "c.conf", "z", "upstream work");
        // Fetch without moving the local branch.
        {
            let mut remote = clone.find_remote("origin").expect("origin remote");
            remote
                .fetch(
                    &["+refs/heads/master:refs/remotes/origin/master"],
                    None,
                    None,
                )
                .expect("fetch");
        }

        let status = repo_status(&cfg).expect("status");
        assert_eq!(status.relation, "behind");
    }

    #[test]
    fn empty_subtree_yields_no_files() {
        let dir = TempDir::new().expect("dir");
        let repo = init_repo(dir.path());
        commit_file(&repo, "elsewhere/a.conf", "x", "msg");
        let tree = branch_tree_files(&repo, "master", "g/h/conf", &[]).expect("tree");
        assert!(tree.files.is_empty());
    }
}
