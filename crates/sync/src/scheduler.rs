//! Wake-up seam between the capture path and the background worker.

use std::sync::Arc;

use tokio::sync::Notify;

/// Ask the background worker to attempt a sync soon.
///
/// Best-effort: wake-ups may coalesce and must never block the caller. The
/// worker still runs its periodic pass, so a lost wake-up only delays replay.
pub trait SyncScheduler: Send + Sync {
    fn request_sync(&self);
}

/// Scheduler for hosts that drive sync themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopScheduler;

impl SyncScheduler for NoopScheduler {
    fn request_sync(&self) {}
}

/// Wakes the worker's select loop through a [`Notify`].
#[derive(Debug, Clone)]
pub struct NotifyScheduler {
    wake: Arc<Notify>,
}

impl NotifyScheduler {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self { wake }
    }
}

impl SyncScheduler for NotifyScheduler {
    fn request_sync(&self) {
        self.wake.notify_one();
    }
}
