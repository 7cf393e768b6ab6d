//! GitIn reconciler: mirror the branch-tip tree of the configuration
//! repository into the `git` namespace of the store.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use nginxops_core::config::{GitConfig, ServerTarget, SyncerConfig};
use nginxops_core::keys;
use nginxops_core::manager::Service;
use nginxops_store::StoreClient;

use crate::error::SyncError;
use crate::mirror::{self, MirrorFile};
use crate::repo;

/// Polls the Git origin and mirrors the committed state for one host.
pub struct GitSyncer {
    store: StoreClient,
    target: ServerTarget,
    git: GitConfig,
    group: String,
    key_prefix: String,
    ignore_patterns: Vec<String>,
    poll_interval: Duration,
}

impl GitSyncer {
    pub fn new(
        store: StoreClient,
        target: ServerTarget,
        git: GitConfig,
        sync_cfg: &SyncerConfig,
        group: &str,
    ) -> Self {
        Self {
            store,
            target,
            git,
            group: group.to_string(),
            key_prefix: sync_cfg.key_prefix.clone(),
            ignore_patterns: sync_cfg.ignore_patterns.clone(),
            poll_interval: sync_cfg.poll_interval(),
        }
    }

    async fn pass(&self) -> Result<(), SyncError> {
        let ns = keys::namespace_prefix(
            &self.key_prefix,
            &self.group,
            &self.target.host,
            self.target.config_dir_suffix(),
        );
        let subtree = format!(
            "{}/{}/{}",
            self.group,
            self.target.host,
            self.target.config_dir_suffix()
        );

        let git = self.git.clone();
        let patterns = self.ignore_patterns.clone();
        let tree = task::spawn_blocking(move || -> Result<repo::BranchTree, SyncError> {
            let repository = repo::sync_repository(&git)?;
            repo::branch_tree_files(&repository, git.branch_or_default(), &subtree, &patterns)
        })
        .await??;

        let meta = serde_json::json!({ "commit": tree.commit, "message": tree.message });
        let commit = tree.commit.clone();
        let mirror_files = tree
            .files
            .into_iter()
            .map(|file| MirrorFile {
                rel_path: file.rel_path,
                bytes: file.bytes,
                meta: meta.clone(),
                commit: Some(commit.clone()),
            })
            .collect();

        mirror::mirror_pass(&self.store, &ns, mirror_files, &self.target.host).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for GitSyncer {
    fn name(&self) -> String {
        format!("git-syncer/{}", self.target.host)
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(host = %self.target.host, "starting git syncer");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(host = %self.target.host, "stopping git syncer");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.pass().await {
                        tracing::error!(
                            host = %self.target.host,
                            error = %err,
                            "failed to sync nginx configuration from git",
                        );
                    }
                }
            }
        }
    }
}
