//! Capture path: persist a mutation that could not reach the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use sitesafe_core::{ConflictPolicy, EntityType, MutationMethod, PendingMutation};
use sitesafe_store::QueueStore;

use crate::error::SyncError;
use crate::events::{SyncEvent, SyncNotifier};
use crate::scheduler::SyncScheduler;

/// The offline mutation queue's write side.
///
/// Capture derives the entity type and stamps the conflict strategy from the
/// policy table, persists the record, pokes the scheduler and emits
/// [`SyncEvent::Queued`]. The caller (the gateway) answers the original
/// request with a synthesized `202 Accepted`.
pub struct OfflineMutationQueue {
    store: Arc<dyn QueueStore>,
    policy: ConflictPolicy,
    notifier: SyncNotifier,
    scheduler: Arc<dyn SyncScheduler>,
    api_prefix: String,
}

impl OfflineMutationQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        policy: ConflictPolicy,
        notifier: SyncNotifier,
        scheduler: Arc<dyn SyncScheduler>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            policy,
            notifier,
            scheduler,
            api_prefix: api_prefix.into(),
        }
    }

    /// Persist a mutating request for later replay.
    ///
    /// `body` is the raw request payload; JSON is stored as-is, anything else
    /// is wrapped so it survives verbatim.
    pub async fn capture(
        &self,
        url: &str,
        method: MutationMethod,
        headers: BTreeMap<String, String>,
        body: &[u8],
    ) -> Result<PendingMutation, SyncError> {
        let body = PendingMutation::parse_body(body);
        let path = url_path(url);
        let entity_type =
            EntityType::from_path(&path, &self.api_prefix).unwrap_or_else(EntityType::unknown);
        let strategy = self.policy.strategy_for(&entity_type);

        let mutation = PendingMutation::new(url, method, headers, body, entity_type, strategy);
        self.store.enqueue(mutation.clone()).await?;

        tracing::info!(
            id = %mutation.id,
            entity = %mutation.entity_type,
            strategy = %mutation.strategy,
            "captured offline mutation"
        );

        self.scheduler.request_sync();
        self.notifier.send(SyncEvent::Queued {
            id: mutation.id,
            entity_type: mutation.entity_type.clone(),
        });

        Ok(mutation)
    }

    /// Number of mutations waiting for replay.
    pub async fn depth(&self) -> Result<usize, SyncError> {
        Ok(self.store.depth().await?)
    }
}

/// Path component of `url`. Absolute URLs are parsed; already-bare paths are
/// taken as-is minus any query string.
pub(crate) fn url_path(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        return parsed.path().to_owned();
    }
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query.to_owned()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sitesafe_core::ConflictStrategy;
    use sitesafe_store::InMemoryQueueStore;

    use crate::scheduler::NoopScheduler;

    use super::*;

    struct CountingScheduler(AtomicUsize);

    impl SyncScheduler for CountingScheduler {
        fn request_sync(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn queue_with(
        store: Arc<InMemoryQueueStore>,
        scheduler: Arc<dyn SyncScheduler>,
    ) -> OfflineMutationQueue {
        OfflineMutationQueue::new(
            store,
            ConflictPolicy::default(),
            SyncNotifier::new(),
            scheduler,
            "/api/",
        )
    }

    #[tokio::test]
    async fn capture_stamps_entity_and_strategy_and_persists() {
        let store = InMemoryQueueStore::arc();
        let queue = queue_with(store.clone(), Arc::new(NoopScheduler));

        let m = queue
            .capture(
                "https://app.sitesafe.io/api/incidents/42?src=mobile",
                MutationMethod::Update,
                BTreeMap::new(),
                br#"{"severity":"high"}"#,
            )
            .await
            .unwrap();

        assert_eq!(m.entity_type, EntityType::new("incidents"));
        assert_eq!(m.strategy, ConflictStrategy::Merge);
        assert_eq!(store.depth().await.unwrap(), 1);
        assert_eq!(queue.depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn capture_outside_known_entities_uses_the_default_strategy() {
        let store = InMemoryQueueStore::arc();
        let queue = queue_with(store, Arc::new(NoopScheduler));

        let m = queue
            .capture(
                "https://app.sitesafe.io/api/exports",
                MutationMethod::Create,
                BTreeMap::new(),
                b"{}",
            )
            .await
            .unwrap();

        assert_eq!(m.strategy, ConflictStrategy::ServerWins);
    }

    #[tokio::test]
    async fn capture_wakes_the_scheduler_and_notifies_listeners() {
        let store = InMemoryQueueStore::arc();
        let scheduler = Arc::new(CountingScheduler(AtomicUsize::new(0)));
        let notifier = SyncNotifier::new();
        let mut rx = notifier.subscribe();
        let queue = OfflineMutationQueue::new(
            store,
            ConflictPolicy::default(),
            notifier,
            scheduler.clone(),
            "/api/",
        );

        queue
            .capture(
                "https://app.sitesafe.io/api/comments",
                MutationMethod::Create,
                BTreeMap::new(),
                br#"{"text":"checked the harness"}"#,
            )
            .await
            .unwrap();

        assert_eq!(scheduler.0.load(Ordering::SeqCst), 1);
        assert!(matches!(rx.recv().await.unwrap(), SyncEvent::Queued { .. }));
    }

    #[test]
    fn url_path_handles_absolute_urls_and_bare_paths() {
        assert_eq!(url_path("https://x.io/api/a/b?q=1"), "/api/a/b");
        assert_eq!(url_path("/api/a/b?q=1"), "/api/a/b");
        assert_eq!(url_path("/api/a#frag"), "/api/a");
    }
}
