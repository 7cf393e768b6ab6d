//! `nginxops serve`: boot the store client, the API server, and one
//! reconciler triple per managed host, then run until a signal arrives.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal::unix::{signal, SignalKind};

use nginxops_core::config::{self, Config};
use nginxops_core::manager::{Service, ServiceManager};
use nginxops_daemon::{pidfile, ApiServer};
use nginxops_store::StoreClient;
use nginxops_sync::{GitSyncer, PreviewSyncer, RemoteSyncer};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Directory searched for config.yaml and servers.yaml
    /// (`<dir>/configs` is tried first).
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,
}

impl ServeArgs {
    pub async fn run(self) -> Result<()> {
        let cfg = config::load_at(&self.config_dir).context("failed to load configuration")?;
        init_tracing(&cfg.logging.level);
        tracing::info!("configuration loaded successfully");

        let store = StoreClient::connect(&cfg.etcd)
            .await
            .context("failed to connect to the coordination store")?;
        tracing::info!(endpoints = ?cfg.etcd.endpoints, "store client connected");

        let cfg = Arc::new(cfg);
        let mut mgr = ServiceManager::new();

        // The API surface is permanent; it survives hot reloads.
        mgr.add(Arc::new(ApiServer::new(cfg.clone(), store.clone())));

        for service in create_syncers(&cfg, &store, &self.config_dir) {
            mgr.add_reloadable(service);
        }

        match pidfile::write_pid_file() {
            Ok(path) => tracing::info!(path = %path.display(), "PID file written"),
            Err(err) => tracing::warn!(error = %err, "failed to write PID file"),
        }

        tracing::info!("starting all services");
        mgr.start();

        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!("received SIGHUP, reloading services");
                    let cfg = cfg.clone();
                    let store = store.clone();
                    let config_dir = self.config_dir.clone();
                    mgr.reload(move || create_syncers(&cfg, &store, &config_dir)).await;
                }
                _ = terminate.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    break;
                }
                _ = interrupt.recv() => {
                    tracing::info!("received SIGINT, shutting down");
                    break;
                }
            }
        }

        mgr.stop().await;
        pidfile::remove_pid_file();
        tracing::info!("services exited");
        Ok(())
    }
}

/// Build the reloadable reconciler set: one RemoteIn, GitIn, and PreviewIn
/// syncer per configured host. `servers.yaml` is re-read from disk so a
/// SIGHUP picks up fleet changes; a validation failure leaves an empty set
/// and is logged rather than killing the daemon.
fn create_syncers(cfg: &Config, store: &StoreClient, config_dir: &Path) -> Vec<Arc<dyn Service>> {
    let groups = match config::load_server_groups_at(config_dir) {
        Ok(groups) => groups,
        Err(err) => {
            tracing::error!(error = %err, "failed to load servers config");
            return Vec::new();
        }
    };

    let mut services: Vec<Arc<dyn Service>> = Vec::new();
    for group in &groups {
        for server in &group.servers {
            services.push(Arc::new(RemoteSyncer::new(
                store.clone(),
                server.clone(),
                &cfg.sync.remote_syncer,
                &group.group,
            )));
            services.push(Arc::new(GitSyncer::new(
                store.clone(),
                server.clone(),
                cfg.git.clone(),
                &cfg.sync.git_syncer,
                &group.group,
            )));
            match PreviewSyncer::new(
                store.clone(),
                server.clone(),
                &cfg.git,
                &cfg.sync.preview_syncer,
                &group.group,
            ) {
                Ok(syncer) => services.push(Arc::new(syncer)),
                Err(err) => {
                    tracing::error!(host = %server.host, error = %err, "failed to create preview syncer");
                }
            }
        }
    }
    services
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
