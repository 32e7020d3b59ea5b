//! Durable queue of pending mutations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use sitesafe_core::{MutationId, MutationStatus, PendingMutation};

use crate::error::StoreError;

/// Mutation queue abstraction.
///
/// Implementations persist each operation atomically so a crash between two
/// calls never leaves a half-written record.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a newly captured mutation.
    async fn enqueue(&self, mutation: PendingMutation) -> Result<MutationId, StoreError>;

    /// Get a mutation by id.
    async fn get(&self, id: MutationId) -> Result<Option<PendingMutation>, StoreError>;

    /// Persist updated retry count / status for an existing mutation.
    async fn update(&self, mutation: &PendingMutation) -> Result<(), StoreError>;

    /// Remove a mutation (after successful replay or a resolved skip).
    async fn delete(&self, id: MutationId) -> Result<(), StoreError>;

    /// All pending mutations, ordered by enqueue time (ids break ties).
    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StoreError>;

    /// Number of pending mutations.
    async fn depth(&self) -> Result<usize, StoreError>;

    /// Mutations parked after exhausting the retry ceiling.
    async fn list_abandoned(&self) -> Result<Vec<PendingMutation>, StoreError>;

    /// Drop abandoned mutations older than the given cutoff. Returns how
    /// many were removed.
    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}

#[async_trait::async_trait]
impl<S> QueueStore for Arc<S>
where
    S: QueueStore + ?Sized,
{
    async fn enqueue(&self, mutation: PendingMutation) -> Result<MutationId, StoreError> {
        (**self).enqueue(mutation).await
    }

    async fn get(&self, id: MutationId) -> Result<Option<PendingMutation>, StoreError> {
        (**self).get(id).await
    }

    async fn update(&self, mutation: &PendingMutation) -> Result<(), StoreError> {
        (**self).update(mutation).await
    }

    async fn delete(&self, id: MutationId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StoreError> {
        (**self).list_pending().await
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        (**self).depth().await
    }

    async fn list_abandoned(&self) -> Result<Vec<PendingMutation>, StoreError> {
        (**self).list_abandoned().await
    }

    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        (**self).purge_abandoned(older_than).await
    }
}

/// In-memory queue store for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    records: RwLock<HashMap<MutationId, PendingMutation>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<MutationId, StoreError> {
        let mut records = self.records.write().unwrap();
        if records.contains_key(&mutation.id) {
            return Err(StoreError::AlreadyExists(mutation.id));
        }
        let id = mutation.id;
        records.insert(id, mutation);
        Ok(id)
    }

    async fn get(&self, id: MutationId) -> Result<Option<PendingMutation>, StoreError> {
        Ok(self.records.read().unwrap().get(&id).cloned())
    }

    async fn update(&self, mutation: &PendingMutation) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if !records.contains_key(&mutation.id) {
            return Err(StoreError::NotFound(mutation.id));
        }
        records.insert(mutation.id, mutation.clone());
        Ok(())
    }

    async fn delete(&self, id: MutationId) -> Result<(), StoreError> {
        let mut records = self.records.write().unwrap();
        if records.remove(&id).is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StoreError> {
        let records = self.records.read().unwrap();
        let mut pending: Vec<_> = records
            .values()
            .filter(|m| m.status == MutationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(PendingMutation::replay_key);
        Ok(pending)
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .filter(|m| m.status == MutationStatus::Pending)
            .count())
    }

    async fn list_abandoned(&self) -> Result<Vec<PendingMutation>, StoreError> {
        let records = self.records.read().unwrap();
        let mut abandoned: Vec<_> = records
            .values()
            .filter(|m| m.status == MutationStatus::Abandoned)
            .cloned()
            .collect();
        abandoned.sort_by_key(PendingMutation::replay_key);
        Ok(abandoned)
    }

    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().unwrap();
        let before = records.len();
        records.retain(|_, m| !(m.status == MutationStatus::Abandoned && m.queued_at < older_than));
        Ok(before - records.len())
    }
}
