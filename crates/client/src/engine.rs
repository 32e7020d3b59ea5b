//! The `OfflineEngine` facade: wires stores, gateway, orchestrator,
//! connectivity and events into one handle for the host.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, Notify};

use sitesafe_store::{
    sqlite, CacheNamespace, CacheStore, InMemoryCacheStore, InMemoryQueueStore, QueueStore,
    SqliteCacheStore, SqliteQueueStore, StoreError,
};
use sitesafe_sync::{
    NotifyScheduler, OfflineMutationQueue, SyncError, SyncEvent, SyncNotifier, SyncOrchestrator,
    SyncResult,
};

use crate::config::EngineConfig;
use crate::connectivity::SharedConnectivity;
use crate::gateway::{Gateway, GatewayError};
use crate::request::{GatewayRequest, GatewayResponse};
use crate::worker::{SyncWorker, WorkerHandle};

/// The offline engine: the application's single entry point for network
/// traffic, queue inspection and sync control.
pub struct OfflineEngine {
    config: Arc<EngineConfig>,
    http: reqwest::Client,
    queue_store: Arc<dyn QueueStore>,
    cache_store: Arc<dyn CacheStore>,
    gateway: Arc<Gateway>,
    orchestrator: Arc<SyncOrchestrator>,
    connectivity: Arc<SharedConnectivity>,
    notifier: SyncNotifier,
    wake: Arc<Notify>,
}

impl OfflineEngine {
    /// Wire an engine over the given stores.
    pub fn new(
        config: EngineConfig,
        queue_store: Arc<dyn QueueStore>,
        cache_store: Arc<dyn CacheStore>,
    ) -> Self {
        let config = Arc::new(config);
        let http = reqwest::Client::new();
        let notifier = SyncNotifier::new();
        let wake = Arc::new(Notify::new());
        let connectivity = SharedConnectivity::arc();

        let queue = Arc::new(OfflineMutationQueue::new(
            queue_store.clone(),
            config.policy.clone(),
            notifier.clone(),
            Arc::new(NotifyScheduler::new(wake.clone())),
            config.api_prefix.clone(),
        ));
        let gateway = Arc::new(Gateway::new(
            config.clone(),
            cache_store.clone(),
            queue,
            connectivity.clone(),
            http.clone(),
        ));
        let mut orchestrator =
            SyncOrchestrator::with_http(queue_store.clone(), notifier.clone(), http.clone())
                .with_retry_ceiling(config.retry_ceiling);
        if let Some(token) = &config.bearer_token {
            orchestrator = orchestrator.with_bearer_token(token);
        }
        let orchestrator = Arc::new(orchestrator);

        Self {
            config,
            http,
            queue_store,
            cache_store,
            gateway,
            orchestrator,
            connectivity,
            notifier,
            wake,
        }
    }

    /// Engine over in-memory stores, for tests and embedded hosts.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, InMemoryQueueStore::arc(), InMemoryCacheStore::arc())
    }

    /// Engine over a single SQLite database file shared by both stores.
    pub async fn open_sqlite(config: EngineConfig, path: &Path) -> Result<Self, StoreError> {
        let pool = sqlite::connect(path).await?;
        let queue_store = Arc::new(SqliteQueueStore::open(pool.clone()).await?);
        let cache_store = Arc::new(SqliteCacheStore::open(pool).await?);
        Ok(Self::new(config, queue_store, cache_store))
    }

    /// Route one request through the gateway.
    pub async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        self.gateway.dispatch(request).await
    }

    /// Run a sync pass right now, independent of the background worker.
    pub async fn sync_now(&self) -> Result<SyncResult, SyncError> {
        self.orchestrator.run_pass().await
    }

    /// Number of mutations waiting for replay.
    pub async fn queue_depth(&self) -> Result<usize, StoreError> {
        self.queue_store.depth().await
    }

    /// Drop the non-essential caches (dynamic, API, images). The app shell
    /// namespace survives so the client stays usable offline.
    pub async fn clear_caches(&self) -> Result<(), StoreError> {
        for namespace in [
            CacheNamespace::Dynamic,
            CacheNamespace::Api,
            CacheNamespace::Images,
        ] {
            self.cache_store.clear(namespace).await?;
        }
        Ok(())
    }

    /// Listen for queue and sync lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.notifier.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The injected connectivity flag. Tests flip it directly; production
    /// hosts let the worker's health probe drive it.
    pub fn connectivity(&self) -> Arc<SharedConnectivity> {
        self.connectivity.clone()
    }

    /// Start the background worker for this engine.
    ///
    /// The worker shares the engine's wake handle, so mutations captured
    /// through [`OfflineEngine::handle`] nudge it to sync early.
    pub fn start_worker(&self) -> WorkerHandle {
        SyncWorker::new(
            self.config.clone(),
            self.http.clone(),
            self.connectivity.clone(),
            self.orchestrator.clone(),
            self.gateway.clone(),
            self.queue_store.clone(),
            self.cache_store.clone(),
            self.wake.clone(),
        )
        .start()
    }
}
