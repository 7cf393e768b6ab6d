//! API server wiring: router, shared state, and the lazily-created per-host
//! connection pools.

mod error;
mod files;
mod git;
mod groups;
mod ops;
mod types;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use nginxops_core::config::{Config, ServerTarget};
use nginxops_core::manager::Service;
use nginxops_store::StoreClient;
use nginxops_transport::SshPool;

use error::ApiError;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    cfg: Arc<Config>,
    store: StoreClient,
    /// One pool per `host:port`, created on first use. The pools are owned
    /// here; reconcilers dial their own connections.
    pools: Arc<Mutex<HashMap<String, Arc<SshPool>>>>,
}

impl AppState {
    fn find_target(&self, group: &str, host: &str) -> Option<ServerTarget> {
        self.cfg
            .server_groups
            .iter()
            .find(|g| g.group == group)?
            .servers
            .iter()
            .find(|s| s.host == host)
            .cloned()
    }

    async fn pool_for(&self, target: &ServerTarget) -> Result<Arc<SshPool>, ApiError> {
        let key = format!("{}:{}", target.host, target.port);
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        let dial_target = target.clone();
        let capacity = self.cfg.api.ssh_pool_capacity;
        let pool = tokio::task::spawn_blocking(move || SshPool::new(dial_target, capacity))
            .await
            .map_err(|err| ApiError::internal(format!("pool task join error: {err}")))?
            .map_err(|err| ApiError::internal(format!("failed to create SSH pool: {err}")))?;

        let pool = Arc::new(pool);
        pools.insert(key, pool.clone());
        Ok(pool)
    }
}

/// The permanent HTTP service.
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(cfg: Arc<Config>, store: StoreClient) -> Self {
        Self {
            state: AppState {
                cfg,
                store,
                pools: Arc::new(Mutex::new(HashMap::new())),
            },
        }
    }
}

#[async_trait]
impl Service for ApiServer {
    fn name(&self) -> String {
        "api-server".to_string()
    }

    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let listen = self.state.cfg.api.listen.clone();
        let listener = tokio::net::TcpListener::bind(&listen).await?;
        tracing::info!(addr = %listen, "api server listening");

        let router = build_router(self.state.clone());
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        tracing::info!("api server stopped");
        Ok(())
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.cfg.api.allow_origins);

    Router::new()
        .route("/api/v1/groups", get(groups::get_groups))
        .route("/api/v1/tree", get(files::get_tree))
        .route("/api/v1/diff", get(files::get_file_diff))
        .route("/api/v1/check", post(ops::check_config))
        .route("/api/v1/apply", post(ops::apply_config))
        .route("/api/v1/git/status", get(git::get_git_status))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allow_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allow_origins.is_empty() || allow_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = allow_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}
