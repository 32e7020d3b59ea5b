//! Sync lifecycle events broadcast to the hosting application.

use serde::Serialize;
use tokio::sync::broadcast;

use sitesafe_core::{EntityType, MutationId};

/// Channel capacity; receivers that lag past this lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What the engine tells the host about queue and sync progress.
///
/// Serializes with a kebab-case `type` discriminator so host bridges can
/// forward events as-is.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    /// A mutation was captured into the offline queue.
    Queued {
        id: MutationId,
        entity_type: EntityType,
    },
    /// A mutation replayed and the server settled it (2xx, or 409 meaning
    /// "already applied").
    SyncSuccess {
        id: MutationId,
        entity_type: EntityType,
        status: u16,
    },
    /// The server rejected a mutation outright; it was dropped.
    SyncFailed {
        id: MutationId,
        entity_type: EntityType,
        status: Option<u16>,
    },
    /// A conflicting mutation was skipped in favor of the server copy.
    ConflictSkipped {
        id: MutationId,
        entity_type: EntityType,
        reason: String,
    },
    /// A mutation exhausted the retry ceiling and was parked.
    NeedsAttention {
        id: MutationId,
        entity_type: EntityType,
        retry_count: u32,
    },
    /// A replay pass finished having done work.
    PassCompleted {
        synced: usize,
        failed: usize,
        conflicts: usize,
        abandoned: usize,
    },
}

/// Broadcast handle for [`SyncEvent`]s.
///
/// Sending is best-effort: with no subscribers events are dropped, and the
/// engine never blocks on a slow listener.
#[derive(Debug, Clone)]
pub struct SyncNotifier {
    tx: broadcast::Sender<SyncEvent>,
}

impl SyncNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: SyncEvent) {
        tracing::debug!(event = ?event, "sync event");
        let _ = self.tx.send(event);
    }
}

impl Default for SyncNotifier {
    fn default() -> Self {
        Self::new()
    }
}
