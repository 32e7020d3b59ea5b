//! One replay pass over the offline queue.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use sitesafe_core::{ConflictStrategy, MutationMethod, MutationStatus, PendingMutation};
use sitesafe_store::QueueStore;

use crate::detector::{has_authorization, ConflictCheck, ConflictDetector};
use crate::error::SyncError;
use crate::events::{SyncEvent, SyncNotifier};
use crate::resolver::{resolve, Resolution};
use crate::{REPLAYED_AT_HEADER, REPLAY_HEADER};

/// Failed attempts a mutation gets before it is parked as abandoned.
pub const DEFAULT_RETRY_CEILING: u32 = 5;

/// Tally of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    /// Settled on the server (2xx or 409).
    pub synced: usize,
    /// Rejected or errored attempts (including the ones later abandoned).
    pub failed: usize,
    /// Skipped in favor of a fresher server copy.
    pub conflicts: usize,
    /// Parked after exhausting the retry ceiling.
    pub abandoned: usize,
}

impl SyncResult {
    pub fn is_noop(&self) -> bool {
        self.synced == 0 && self.failed == 0 && self.conflicts == 0 && self.abandoned == 0
    }
}

/// Drives replay: loads pending mutations oldest-first and settles each one
/// against the API exactly once per pass.
pub struct SyncOrchestrator {
    store: Arc<dyn QueueStore>,
    detector: ConflictDetector,
    http: reqwest::Client,
    notifier: SyncNotifier,
    retry_ceiling: u32,
    bearer_token: Option<String>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn QueueStore>, notifier: SyncNotifier) -> Self {
        Self::with_http(store, notifier, reqwest::Client::new())
    }

    /// Build on a shared HTTP client (the gateway's), keeping one connection
    /// pool per engine.
    pub fn with_http(
        store: Arc<dyn QueueStore>,
        notifier: SyncNotifier,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            detector: ConflictDetector::new(http.clone()),
            http,
            notifier,
            retry_ceiling: DEFAULT_RETRY_CEILING,
            bearer_token: None,
        }
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    /// Token attached to replays and conflict probes whose captured headers
    /// carry no `Authorization` of their own. Captured requests keep whatever
    /// they were sent with; this covers the engine-held credential.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.detector = self.detector.with_bearer_token(token.clone());
        self.bearer_token = Some(token);
        self
    }

    /// Replay every pending mutation once, oldest first.
    ///
    /// Store failures abort the pass; per-mutation network failures do not,
    /// they count against that mutation's retries.
    pub async fn run_pass(&self) -> Result<SyncResult, SyncError> {
        let mut pending = self.store.list_pending().await?;
        pending.sort_by_key(PendingMutation::replay_key);

        let mut result = SyncResult::default();
        for mutation in pending {
            self.settle(mutation, &mut result).await?;
        }

        if result.synced > 0 || result.conflicts > 0 {
            tracing::info!(
                synced = result.synced,
                failed = result.failed,
                conflicts = result.conflicts,
                abandoned = result.abandoned,
                "sync pass completed"
            );
            self.notifier.send(SyncEvent::PassCompleted {
                synced: result.synced,
                failed: result.failed,
                conflicts: result.conflicts,
                abandoned: result.abandoned,
            });
        }

        Ok(result)
    }

    async fn settle(
        &self,
        mut mutation: PendingMutation,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let mut replay_body = mutation.body.clone();

        // Client-wins replays unconditionally, so skip the probe round-trip.
        if mutation.method.is_update() && mutation.strategy != ConflictStrategy::ClientWins {
            if let ConflictCheck::Conflict {
                server_entity,
                server_time,
            } = self.detector.check(&mutation).await
            {
                tracing::debug!(
                    id = %mutation.id,
                    entity = %mutation.entity_type,
                    server_time = %server_time,
                    queued_at = %mutation.queued_at,
                    "server copy changed since enqueue"
                );
                match resolve(mutation.strategy, &mutation.body, &server_entity) {
                    Resolution::Skip { reason } => {
                        self.store.delete(mutation.id).await?;
                        result.conflicts += 1;
                        tracing::info!(
                            id = %mutation.id,
                            entity = %mutation.entity_type,
                            reason = %reason,
                            "conflicting mutation skipped"
                        );
                        self.notifier.send(SyncEvent::ConflictSkipped {
                            id: mutation.id,
                            entity_type: mutation.entity_type.clone(),
                            reason,
                        });
                        return Ok(());
                    }
                    Resolution::Proceed { body } => replay_body = body,
                }
            }
        }

        match self.replay(&mutation, &replay_body).await {
            // 409 means the server already holds an equivalent write; the
            // mutation is settled either way.
            Ok(status) if status.is_success() || status == StatusCode::CONFLICT => {
                self.store.delete(mutation.id).await?;
                result.synced += 1;
                self.notifier.send(SyncEvent::SyncSuccess {
                    id: mutation.id,
                    entity_type: mutation.entity_type.clone(),
                    status: status.as_u16(),
                });
            }
            Ok(status) if status.is_client_error() => {
                // The server understood the request and said no. Retrying
                // the same bytes cannot change the answer.
                self.store.delete(mutation.id).await?;
                result.failed += 1;
                tracing::warn!(
                    id = %mutation.id,
                    entity = %mutation.entity_type,
                    status = status.as_u16(),
                    "mutation rejected by server; dropped"
                );
                self.notifier.send(SyncEvent::SyncFailed {
                    id: mutation.id,
                    entity_type: mutation.entity_type.clone(),
                    status: Some(status.as_u16()),
                });
            }
            Ok(status) => {
                tracing::warn!(
                    id = %mutation.id,
                    status = status.as_u16(),
                    "server error during replay; will retry"
                );
                self.record_transient_failure(&mut mutation, result).await?;
            }
            Err(err) => {
                tracing::warn!(id = %mutation.id, error = %err, "replay attempt failed; will retry");
                self.record_transient_failure(&mut mutation, result).await?;
            }
        }

        Ok(())
    }

    /// Send the (possibly resolved) body with the replay marker headers.
    async fn replay(
        &self,
        mutation: &PendingMutation,
        body: &Value,
    ) -> Result<StatusCode, SyncError> {
        let mut req = self.http.request(http_method(mutation.method), &mutation.url);
        for (name, value) in &mutation.headers {
            if name.eq_ignore_ascii_case("content-length") {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }
        req = req
            .header(REPLAY_HEADER, "1")
            .header(REPLAYED_AT_HEADER, mutation.queued_at_millis().to_string());
        if let Some(token) = &self.bearer_token {
            if !has_authorization(&mutation.headers) {
                req = req.bearer_auth(token);
            }
        }

        req = match body {
            Value::Null => req,
            body => match PendingMutation::raw_body(body) {
                // Non-JSON payloads go back on the wire byte-identical.
                Some(raw) => req.body(raw.to_owned()),
                None => req.json(body),
            },
        };

        let resp = req
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(resp.status())
    }

    async fn record_transient_failure(
        &self,
        mutation: &mut PendingMutation,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        mutation.retry_count += 1;
        result.failed += 1;

        if mutation.retry_count >= self.retry_ceiling {
            mutation.status = MutationStatus::Abandoned;
            self.store.update(mutation).await?;
            result.abandoned += 1;
            tracing::warn!(
                id = %mutation.id,
                entity = %mutation.entity_type,
                retries = mutation.retry_count,
                "mutation abandoned after exhausting retries"
            );
            self.notifier.send(SyncEvent::NeedsAttention {
                id: mutation.id,
                entity_type: mutation.entity_type.clone(),
                retry_count: mutation.retry_count,
            });
        } else {
            self.store.update(mutation).await?;
        }

        Ok(())
    }
}

fn http_method(method: MutationMethod) -> reqwest::Method {
    match method {
        MutationMethod::Create => reqwest::Method::POST,
        MutationMethod::Update => reqwest::Method::PUT,
        MutationMethod::Delete => reqwest::Method::DELETE,
    }
}
