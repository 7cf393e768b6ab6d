//! RemoteIn reconciler: mirror a host's live nginx configuration directory
//! into the `prod` namespace of the store.

use std::time::Duration;

use async_trait::async_trait;
use tokio::task;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use nginxops_core::config::{ServerTarget, SyncerConfig};
use nginxops_core::ignore::is_ignored;
use nginxops_core::keys;
use nginxops_core::manager::Service;
use nginxops_store::StoreClient;
use nginxops_transport::SshClient;

use crate::error::SyncError;
use crate::mirror::{self, MirrorFile};

/// Polls a remote host's filesystem and mirrors it into the store.
pub struct RemoteSyncer {
    store: StoreClient,
    target: ServerTarget,
    group: String,
    key_prefix: String,
    ignore_patterns: Vec<String>,
    poll_interval: Duration,
}

impl RemoteSyncer {
    pub fn new(
        store: StoreClient,
        target: ServerTarget,
        sync_cfg: &SyncerConfig,
        group: &str,
    ) -> Self {
        Self {
            store,
            target,
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

        let target = self.target.clone();
        let patterns = self.ignore_patterns.clone();
        let files = task::spawn_blocking(move || read_remote_files(&target, &patterns)).await??;

        tracing::info!(
            host = %self.target.host,
            dir = %self.target.nginx_config_dir,
            files = files.len(),
            "found remote config files",
        );

        let now = chrono::Utc::now().to_rfc3339();
        let mirror_files = files
            .into_iter()
            .map(|(rel_path, bytes)| MirrorFile {
                rel_path,
                bytes,
                meta: serde_json::json!({ "source": "nginx-remote", "last_updated": now }),
                commit: None,
            })
            .collect();

        mirror::mirror_pass(&self.store, &ns, mirror_files, &self.target.host).await?;
        Ok(())
    }
}

#[async_trait]
impl Service for RemoteSyncer {
    fn name(&self) -> String {
        format!("remote-syncer/{}", self.target.host)
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(host = %self.target.host, "starting remote syncer");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(host = %self.target.host, "stopping remote syncer");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.pass().await {
                        tracing::error!(
                            host = %self.target.host,
                            error = %err,
                            "failed to sync nginx configuration from remote host",
                        );
                    }
                }
            }
        }
    }
}

/// Dial the host, enumerate `find <dir> -type f`, and read every
/// non-ignored file. Per-file read failures are logged and skipped so one
/// bad file never blocks the rest of the pass.
fn read_remote_files(
    target: &ServerTarget,
    ignore_patterns: &[String],
) -> Result<Vec<(String, Vec<u8>)>, SyncError> {
    let client = SshClient::connect(target)?;
    let dir = target.nginx_config_dir.trim_end_matches('/').to_string();

    let listing = client.run_checked(&format!("find {dir} -type f"));
    let listing = match listing {
        Ok(listing) => listing,
        Err(err) => {
            client.close();
            return Err(err.into());
        }
    };

    let mut files = Vec::new();
    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rel = line
            .strip_prefix(dir.as_str())
            .unwrap_or(line)
            .trim_start_matches('/');
        if rel.is_empty() {
            continue;
        }
        if is_ignored(rel, ignore_patterns) {
            tracing::debug!(file = %rel, "ignoring remote file");
            continue;
        }
        match client.read_file(line) {
            Ok(bytes) => files.push((rel.to_string(), bytes)),
            Err(err) => {
                tracing::error!(file = %line, error = %err, "failed to read remote file");
            }
        }
    }

    client.close();
    Ok(files)
}
