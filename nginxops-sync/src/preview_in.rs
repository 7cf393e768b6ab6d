//! PreviewIn reconciler: mirror the Git working tree, uncommitted edits
//! included, into the `preview` namespace of the store.
//!
//! Change events drive low-latency passes; a 5-second tick guarantees
//! convergence because events can be lost under pressure or on network
//! filesystems.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use nginxops_core::config::{GitConfig, ServerTarget, SyncerConfig};
use nginxops_core::ignore::is_ignored;
use nginxops_core::keys;
use nginxops_core::manager::Service;
use nginxops_store::StoreClient;

use crate::error::{io_err, SyncError};
use crate::mirror::{self, MirrorFile};

const PREVIEW_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watches the local working tree and mirrors it into the store.
pub struct PreviewSyncer {
    store: StoreClient,
    target: ServerTarget,
    group: String,
    key_prefix: String,
    repo_path: PathBuf,
    ignore_patterns: Vec<String>,
}

impl PreviewSyncer {
    /// Ignore patterns combine `.gitignore` at the repo root (loaded once,
    /// at construction) with the configured list.
    pub fn new(
        store: StoreClient,
        target: ServerTarget,
        git: &GitConfig,
        sync_cfg: &SyncerConfig,
        group: &str,
    ) -> Result<Self, SyncError> {
        if git.repo_path.as_os_str().is_empty() {
            return Err(io_err(
                &git.repo_path,
                std::io::Error::other("git repo_path is not configured"),
            ));
        }

        let mut ignore_patterns = match load_gitignore(&git.repo_path) {
            Ok(patterns) => patterns,
            Err(err) => {
                tracing::warn!(error = %err, "failed to load .gitignore, continuing without it");
                Vec::new()
            }
        };
        ignore_patterns.extend(sync_cfg.ignore_patterns.iter().cloned());

        Ok(Self {
            store,
            target,
            group: group.to_string(),
            key_prefix: sync_cfg.key_prefix.clone(),
            repo_path: git.repo_path.clone(),
            ignore_patterns,
        })
    }

    async fn pass(&self) -> Result<(), SyncError> {
        let suffix = self.target.config_dir_suffix();
        let ns =
            keys::namespace_prefix(&self.key_prefix, &self.group, &self.target.host, suffix);
        let expected_prefix = format!("{}/{}/{}", self.group, self.target.host, suffix);

        let root = self.repo_path.clone();
        let patterns = self.ignore_patterns.clone();
        let files =
            task::spawn_blocking(move || walk_working_tree(&root, &expected_prefix, &patterns))
                .await??;

        let now = chrono::Utc::now().to_rfc3339();
        let mirror_files = files
            .into_iter()
            .map(|(rel_path, bytes)| MirrorFile {
                rel_path,
                bytes,
                meta: serde_json::json!({ "source": "preview", "last_updated": now }),
                commit: None,
            })
            .collect();

        mirror::mirror_pass(&self.store, &ns, mirror_files, &self.target.host).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for PreviewSyncer {
    fn name(&self) -> String {
        format!("preview-syncer/{}", self.target.host)
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(host = %self.target.host, path = %self.repo_path.display(), "starting preview syncer");

        let repo_path = fs::canonicalize(&self.repo_path).unwrap_or_else(|_| self.repo_path.clone());

        if let Err(err) = self.pass().await {
            tracing::error!(host = %self.target.host, error = %err, "initial preview sync failed");
        }

        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        let mut watched_dirs = HashSet::new();
        register_watch_tree(&mut watcher, &mut watched_dirs, &repo_path, &self.ignore_patterns)?;

        let mut ticker = tokio::time::interval(PREVIEW_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The initial pass already ran; skip the interval's immediate tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(host = %self.target.host, "stopping preview syncer");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.pass().await {
                        tracing::error!(host = %self.target.host, error = %err, "periodic preview sync failed");
                    }
                }
                event = event_rx.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    let event = match event {
                        Ok(event) => event,
                        Err(err) => {
                            tracing::warn!(error = %err, "file watcher error");
                            continue;
                        }
                    };
                    if !is_relevant_event_kind(&event.kind) {
                        continue;
                    }

                    let mut relevant = false;
                    for path in &event.paths {
                        let rel = path
                            .strip_prefix(&repo_path)
                            .unwrap_or(path.as_path())
                            .to_string_lossy()
                            .into_owned();
                        if is_ignored(&rel, &self.ignore_patterns) {
                            continue;
                        }
                        relevant = true;
                        // New directories must be registered before their
                        // contents can produce events.
                        if path.is_dir() {
                            if let Err(err) = register_watch_tree(
                                &mut watcher,
                                &mut watched_dirs,
                                path,
                                &self.ignore_patterns,
                            ) {
                                tracing::warn!(path = %path.display(), error = %err, "failed to watch new directory");
                            }
                        }
                    }
                    if relevant {
                        tracing::debug!(host = %self.target.host, "file change detected, triggering sync");
                        if let Err(err) = self.pass().await {
                            tracing::error!(host = %self.target.host, error = %err, "failed to sync after file event");
                        }
                    }
                }
            }
        }
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Load `.gitignore` patterns from the repository root. A missing file
/// yields an empty list.
fn load_gitignore(repo_path: &Path) -> Result<Vec<String>, SyncError> {
    let path = repo_path.join(".gitignore");
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(&path, err)),
    };

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Walk the working tree and collect `(relPath, bytes)` for every
/// non-ignored file under `<expected_prefix>/`, where relPath is the tail
/// after that prefix. Unreadable files are logged and skipped.
fn walk_working_tree(
    root: &Path,
    expected_prefix: &str,
    ignore_patterns: &[String],
) -> Result<Vec<(String, Vec<u8>)>, SyncError> {
    let mut out = Vec::new();
    let mut dirs = vec![root.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            let rel = rel.to_string_lossy().into_owned();
            if is_ignored(&rel, ignore_patterns) {
                continue;
            }

            let file_type = entry.file_type().map_err(|e| io_err(&path, e))?;
            if file_type.is_dir() {
                dirs.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }

            let Some(tail) = rel
                .strip_prefix(expected_prefix)
                .and_then(|t| t.strip_prefix('/'))
            else {
                continue;
            };
            if tail.is_empty() {
                continue;
            }

            match fs::read(&path) {
                Ok(bytes) => out.push((tail.to_string(), bytes)),
                Err(err) => {
                    tracing::error!(file = %path.display(), error = %err, "failed to read working-tree file");
                }
            }
        }
    }

    Ok(out)
}

/// Register a non-recursive watch on every non-ignored directory under
/// `root` that is not already watched.
fn register_watch_tree(
    watcher: &mut RecommendedWatcher,
    watched_dirs: &mut HashSet<PathBuf>,
    root: &Path,
    ignore_patterns: &[String],
) -> Result<(), SyncError> {
    let mut dirs = vec![root.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let canonical = match fs::canonicalize(&dir) {
            Ok(path) => path,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        if watched_dirs.insert(canonical.clone()) {
            watcher.watch(&canonical, RecursiveMode::NonRecursive)?;
            tracing::debug!(path = %canonical.display(), "watching directory");
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(io_err(&dir, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path.as_path())
                .to_string_lossy()
                .into_owned();
            if is_ignored(&rel, ignore_patterns) {
                continue;
            }
            dirs.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let full = root.join(rel);
        fs::create_dir_all(full.parent().expect("parent")).expect("mkdir");
        fs::write(full, content).expect("write");
    }

    #[test]
    fn walk_collects_only_the_config_subtree() {
        let repo = TempDir::new().expect("repo");
        write(repo.path(), "webA/10.0.0.1/conf/nginx.conf", "server {}");
        write(repo.path(), "webA/10.0.0.1/conf/sites/a.conf", "upstream {}");
        write(repo.path(), "webB/10.0.0.2/conf/other.conf", "x");
        write(repo.path(), "README.md", "docs");

        let mut files =
            walk_working_tree(repo.path(), "webA/10.0.0.1/conf", &[]).expect("walk");
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let rels: Vec<&str> = files.iter().map(|(rel, _)| rel.as_str()).collect();
        assert_eq!(rels, vec!["nginx.conf", "sites/a.conf"]);
        assert_eq!(files[0].1, b"server {}".to_vec());
    }

    #[test]
    fn walk_applies_ignore_rules() {
        let repo = TempDir::new().expect("repo");
        write(repo.path(), "g/h/conf/nginx.conf", "keep");
        write(repo.path(), "g/h/conf/.env", "hidden");
        write(repo.path(), "g/h/conf/nginx.conf.swp", "swap");
        write(repo.path(), "g/h/conf/build/artifact.conf", "built");

        let files = walk_working_tree(repo.path(), "g/h/conf", &["build".to_string()])
            .expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "nginx.conf");
    }

    #[test]
    fn walk_empty_repo_yields_nothing() {
        let repo = TempDir::new().expect("repo");
        let files = walk_working_tree(repo.path(), "g/h/conf", &[]).expect("walk");
        assert!(files.is_empty());
    }

    #[test]
    fn gitignore_patterns_skip_comments_and_blanks() {
        let repo = TempDir::new().expect("repo");
        fs::write(
            repo.path().join(".gitignore"),
            "# build output\n\n*.log\ntarget\n",
        )
        .expect("gitignore");

        let patterns = load_gitignore(repo.path()).expect("load");
        assert_eq!(patterns, vec!["*.log".to_string(), "target".to_string()]);
    }

    #[test]
    fn missing_gitignore_is_empty() {
        let repo = TempDir::new().expect("repo");
        assert!(load_gitignore(repo.path()).expect("load").is_empty());
    }

    #[test]
    fn gitignore_patterns_filter_the_walk() {
        let repo = TempDir::new().expect("repo");
        fs::write(repo.path().join(".gitignore"), "*.log\n").expect("gitignore");
        write(repo.path(), "g/h/conf/nginx.conf", "keep");
        write(repo.path(), "g/h/conf/debug.log", "noise");

        let patterns = load_gitignore(repo.path()).expect("load");
        let files = walk_working_tree(repo.path(), "g/h/conf", &patterns).expect("walk");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, "nginx.conf");
    }
}
