//! Service lifecycle manager.
//!
//! Two disjoint service sets run under nested cancellation scopes:
//!
//! - *permanent* services (API surface, push pipeline) live under the root
//!   scope and stop only on process shutdown;
//! - *reloadable* services (the per-host reconcilers) live under a child
//!   scope that is cancelled and recreated on hot reload, leaving the
//!   permanent set untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A long-running background service.
#[async_trait]
pub trait Service: Send + Sync {
    /// Name used in lifecycle logs.
    fn name(&self) -> String;

    /// Run until `shutdown` is cancelled or an unrecoverable error occurs.
    /// Must return promptly on cancellation; cancellation is `Ok`, not an
    /// error.
    async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Manages the lifecycle of permanent and reloadable services.
pub struct ServiceManager {
    root: CancellationToken,
    reload_scope: CancellationToken,
    permanent: Vec<Arc<dyn Service>>,
    reloadable: Vec<Arc<dyn Service>>,
    permanent_tasks: JoinSet<()>,
    reloadable_tasks: JoinSet<()>,
    started: bool,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let reload_scope = root.child_token();
        Self {
            root,
            reload_scope,
            permanent: Vec::new(),
            reloadable: Vec::new(),
            permanent_tasks: JoinSet::new(),
            reloadable_tasks: JoinSet::new(),
            started: false,
        }
    }

    /// Register a permanent service. Spawns immediately if already started.
    pub fn add(&mut self, service: Arc<dyn Service>) {
        if self.started {
            spawn_worker(&mut self.permanent_tasks, service, self.root.clone());
        } else {
            self.permanent.push(service);
        }
    }

    /// Register a reloadable service. Spawns immediately if already started.
    pub fn add_reloadable(&mut self, service: Arc<dyn Service>) {
        if self.started {
            spawn_worker(
                &mut self.reloadable_tasks,
                service,
                self.reload_scope.clone(),
            );
        } else {
            self.reloadable.push(service);
        }
    }

    /// Spawn one worker per registered service.
    pub fn start(&mut self) {
        self.started = true;
        for service in self.permanent.drain(..) {
            spawn_worker(&mut self.permanent_tasks, service, self.root.clone());
        }
        for service in self.reloadable.drain(..) {
            spawn_worker(
                &mut self.reloadable_tasks,
                service,
                self.reload_scope.clone(),
            );
        }
    }

    /// Replace the reloadable set: cancel the inner scope, wait for every
    /// reloadable worker to return, then spawn the factory's services under
    /// a fresh scope. Permanent services are untouched.
    pub async fn reload<F>(&mut self, factory: F)
    where
        F: FnOnce() -> Vec<Arc<dyn Service>>,
    {
        tracing::info!("reloading services");
        self.reload_scope.cancel();
        while self.reloadable_tasks.join_next().await.is_some() {}

        self.reload_scope = self.root.child_token();
        let services = factory();
        let count = services.len();
        for service in services {
            spawn_worker(
                &mut self.reloadable_tasks,
                service,
                self.reload_scope.clone(),
            );
        }
        tracing::info!(services = count, "reload complete");
    }

    /// Cancel the root scope and wait for every worker.
    pub async fn stop(&mut self) {
        self.root.cancel();
        while self.reloadable_tasks.join_next().await.is_some() {}
        while self.permanent_tasks.join_next().await.is_some() {}
    }
}

fn spawn_worker(tasks: &mut JoinSet<()>, service: Arc<dyn Service>, shutdown: CancellationToken) {
    tasks.spawn(async move {
        let name = service.name();
        tracing::info!(service = %name, "starting service");
        if let Err(err) = service.start(shutdown).await {
            tracing::error!(service = %name, error = %err, "service stopped with error");
        } else {
            tracing::info!(service = %name, "service stopped");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct StubService {
        name: String,
        started: Arc<AtomicBool>,
        cancelled: Arc<AtomicBool>,
    }

    impl StubService {
        fn new(name: &str) -> (Arc<Self>, Arc<AtomicBool>, Arc<AtomicBool>) {
            let started = Arc::new(AtomicBool::new(false));
            let cancelled = Arc::new(AtomicBool::new(false));
            let service = Arc::new(Self {
                name: name.to_string(),
                started: started.clone(),
                cancelled: cancelled.clone(),
            });
            (service, started, cancelled)
        }
    }

    #[async_trait]
    impl Service for StubService {
        fn name(&self) -> String {
            self.name.clone()
        }

        async fn start(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
            self.started.store(true, Ordering::SeqCst);
            shutdown.cancelled().await;
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingService;

    #[async_trait]
    impl Service for FailingService {
        fn name(&self) -> String {
            "failing".to_string()
        }

        async fn start(&self, _shutdown: CancellationToken) -> anyhow::Result<()> {
            anyhow::bail!("unrecoverable")
        }
    }

    #[tokio::test]
    async fn stop_cancels_every_service() {
        let (permanent, p_started, p_cancelled) = StubService::new("api");
        let (reloadable, r_started, r_cancelled) = StubService::new("syncer");

        let mut mgr = ServiceManager::new();
        mgr.add(permanent);
        mgr.add_reloadable(reloadable);
        mgr.start();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(p_started.load(Ordering::SeqCst));
        assert!(r_started.load(Ordering::SeqCst));

        mgr.stop().await;
        assert!(p_cancelled.load(Ordering::SeqCst));
        assert!(r_cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn reload_preserves_permanent_services() {
        let (permanent, _, p_cancelled) = StubService::new("api");
        let (old_gen, _, old_cancelled) = StubService::new("syncer-old");

        let mut mgr = ServiceManager::new();
        mgr.add(permanent);
        mgr.add_reloadable(old_gen);
        mgr.start();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (new_gen, new_started, _) = StubService::new("syncer-new");
        mgr.reload(move || vec![new_gen as Arc<dyn Service>]).await;

        // Reload drains the old generation before returning.
        assert!(old_cancelled.load(Ordering::SeqCst));
        assert!(!p_cancelled.load(Ordering::SeqCst), "permanent survived reload");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(new_started.load(Ordering::SeqCst), "new generation spawned");

        mgr.stop().await;
        assert!(p_cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn service_error_does_not_terminate_the_manager() {
        let (survivor, _, cancelled) = StubService::new("survivor");

        let mut mgr = ServiceManager::new();
        mgr.add(Arc::new(FailingService));
        mgr.add(survivor);
        mgr.start();

        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.stop().await;
        assert!(cancelled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn add_after_start_spawns_immediately() {
        let mut mgr = ServiceManager::new();
        mgr.start();

        let (late, started, _) = StubService::new("late");
        mgr.add_reloadable(late);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(started.load(Ordering::SeqCst));

        mgr.stop().await;
    }

    #[tokio::test]
    async fn repeated_reload_spawns_each_generation_under_fresh_scope() {
        let generations = Arc::new(AtomicUsize::new(0));

        let mut mgr = ServiceManager::new();
        mgr.start();

        for _ in 0..3 {
            let (service, _, _) = StubService::new("gen");
            let counter = generations.clone();
            mgr.reload(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                vec![service as Arc<dyn Service>]
            })
            .await;
        }

        assert_eq!(generations.load(Ordering::SeqCst), 3);
        mgr.stop().await;
    }
}
