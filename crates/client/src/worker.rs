//! Background worker: connectivity probing, periodic sync passes and the
//! host command channel.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::Instant;

use sitesafe_store::{CacheNamespace, CacheStore, QueueStore, StoreError};
use sitesafe_sync::{SyncError, SyncOrchestrator, SyncResult};

use crate::config::EngineConfig;
use crate::connectivity::{probe_health, ConnectivityMonitor, ConnectivityState, SharedConnectivity};
use crate::gateway::Gateway;

/// Failing passes back off up to this long between attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Commands a host can send into the running worker.
pub enum WorkerCommand {
    /// Run a sync pass now and reply with its result.
    ForceSync(oneshot::Sender<Result<SyncResult, SyncError>>),
    /// Reply with the number of pending mutations.
    QueueDepth(oneshot::Sender<Result<usize, StoreError>>),
    /// Drop the dynamic, API and image caches. The app shell stays: it is
    /// what keeps the client usable offline.
    ClearCaches(oneshot::Sender<Result<(), StoreError>>),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("sync worker is not running")]
    NotRunning,
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Handle to a started worker.
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl WorkerHandle {
    /// Nudge the worker to attempt a sync soon (best-effort, non-blocking).
    pub fn request_sync(&self) {
        self.wake.notify_one();
    }

    /// Run a sync pass immediately, regardless of the connectivity flag.
    pub async fn force_sync(&self) -> Result<SyncResult, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::ForceSync(tx))
            .await
            .map_err(|_| WorkerError::NotRunning)?;
        rx.await.map_err(|_| WorkerError::NotRunning)?.map_err(WorkerError::Sync)
    }

    pub async fn queue_depth(&self) -> Result<usize, WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::QueueDepth(tx))
            .await
            .map_err(|_| WorkerError::NotRunning)?;
        rx.await.map_err(|_| WorkerError::NotRunning)?.map_err(WorkerError::Store)
    }

    pub async fn clear_caches(&self) -> Result<(), WorkerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(WorkerCommand::ClearCaches(tx))
            .await
            .map_err(|_| WorkerError::NotRunning)?;
        rx.await.map_err(|_| WorkerError::NotRunning)?.map_err(WorkerError::Store)
    }

    /// Graceful shutdown: signal the loop and wait for it to finish.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.join.await;
    }
}

/// Periodically probes the API, drives the connectivity flag, and replays the
/// queue when the connection is back (or backlog exists while online).
pub struct SyncWorker {
    config: Arc<EngineConfig>,
    http: reqwest::Client,
    connectivity: Arc<SharedConnectivity>,
    orchestrator: Arc<SyncOrchestrator>,
    gateway: Arc<Gateway>,
    queue_store: Arc<dyn QueueStore>,
    cache_store: Arc<dyn CacheStore>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl SyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        http: reqwest::Client,
        connectivity: Arc<SharedConnectivity>,
        orchestrator: Arc<SyncOrchestrator>,
        gateway: Arc<Gateway>,
        queue_store: Arc<dyn QueueStore>,
        cache_store: Arc<dyn CacheStore>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            http,
            connectivity,
            orchestrator,
            gateway,
            queue_store,
            cache_store,
            wake,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Spawn the worker loop and hand back its control handle.
    pub fn start(self) -> WorkerHandle {
        let (tx, rx) = mpsc::channel(16);
        let wake = self.wake.clone();
        let shutdown = self.shutdown.clone();
        let join = tokio::spawn(self.run(rx));
        WorkerHandle {
            commands: tx,
            wake,
            shutdown,
            join,
        }
    }

    async fn run(self, mut commands: mpsc::Receiver<WorkerCommand>) {
        tracing::info!(interval = ?self.config.poll_interval, "sync worker started");

        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut consecutive_failures = 0u32;
        let mut backoff_until: Option<Instant> = None;
        let mut was_online = self.connectivity.is_online();

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("sync worker received shutdown signal");
                    break;
                }
                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                }
                _ = self.wake.notified() => {
                    self.tick(&mut consecutive_failures, &mut backoff_until, &mut was_online, false)
                        .await;
                }
                _ = interval.tick() => {
                    self.tick(&mut consecutive_failures, &mut backoff_until, &mut was_online, true)
                        .await;
                }
            }
        }

        tracing::info!("sync worker stopped");
    }

    async fn tick(
        &self,
        consecutive_failures: &mut u32,
        backoff_until: &mut Option<Instant>,
        was_online: &mut bool,
        refresh_routes: bool,
    ) {
        if let Some(until) = *backoff_until {
            if Instant::now() < until {
                tracing::debug!("skipping tick during backoff");
                return;
            }
        }

        let state = probe_health(&self.http, &self.config.api_base).await;
        self.connectivity.set_state(state);
        let online = state == ConnectivityState::Online;
        let reconnected = online && !*was_online;
        *was_online = online;

        if !online {
            return;
        }

        let depth = match self.queue_store.depth().await {
            Ok(depth) => depth,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read queue depth");
                0
            }
        };

        if reconnected || depth > 0 {
            match self.orchestrator.run_pass().await {
                Ok(result) => {
                    *consecutive_failures = 0;
                    *backoff_until = None;
                    if !result.is_noop() {
                        tracing::debug!(?result, "worker sync pass finished");
                    }
                }
                Err(err) => {
                    *consecutive_failures += 1;
                    let backoff = backoff_delay(*consecutive_failures);
                    *backoff_until = Some(Instant::now() + backoff);
                    tracing::warn!(
                        error = %err,
                        failures = *consecutive_failures,
                        backoff = ?backoff,
                        "sync pass failed; backing off"
                    );
                }
            }
        }

        if refresh_routes {
            self.gateway.refresh_high_priority().await;
        }
    }

    async fn handle_command(&self, command: WorkerCommand) {
        match command {
            WorkerCommand::ForceSync(reply) => {
                let result = self.orchestrator.run_pass().await;
                let _ = reply.send(result);
            }
            WorkerCommand::QueueDepth(reply) => {
                let _ = reply.send(self.queue_store.depth().await);
            }
            WorkerCommand::ClearCaches(reply) => {
                let _ = reply.send(self.clear_caches().await);
            }
        }
    }

    async fn clear_caches(&self) -> Result<(), StoreError> {
        for namespace in [
            CacheNamespace::Dynamic,
            CacheNamespace::Api,
            CacheNamespace::Images,
        ] {
            self.cache_store.clear(namespace).await?;
        }
        tracing::info!("cleared dynamic, api and image caches");
        Ok(())
    }
}

/// 1s, 2s, 4s, ... doubling per consecutive failure, capped at five minutes.
fn backoff_delay(consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(16);
    let delay = Duration::from_secs(1) * 2u32.pow(exponent);
    delay.min(MAX_BACKOFF)
}
