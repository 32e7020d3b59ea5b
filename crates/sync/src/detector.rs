//! Pre-replay conflict detection against the live server copy.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use sitesafe_core::PendingMutation;

use crate::PROBE_HEADER;

/// How long a probe read may take before it is written off.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of probing the entity a mutation targets.
#[derive(Debug)]
pub enum ConflictCheck {
    /// No fresher server copy, or no way to tell.
    NoConflict,
    /// The server copy changed after the mutation was queued.
    Conflict {
        server_entity: Value,
        server_time: DateTime<Utc>,
    },
}

/// Probes the entity's canonical path before an update replays.
///
/// Detection fails open: a probe that errors, times out, returns non-2xx or
/// yields a body without a parseable timestamp reports no conflict, so replay
/// proceeds rather than stalling the queue on a flaky read.
pub struct ConflictDetector {
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl ConflictDetector {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            bearer_token: None,
        }
    }

    /// Token attached to probes whose captured headers carry no
    /// `Authorization` of their own.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Compare the server copy's `updatedAt`/`createdAt` with the mutation's
    /// enqueue time. Strictly newer means conflict.
    pub async fn check(&self, mutation: &PendingMutation) -> ConflictCheck {
        let Some(probe_url) = entity_probe_url(&mutation.url) else {
            return ConflictCheck::NoConflict;
        };

        let mut req = self
            .http
            .get(&probe_url)
            .header(PROBE_HEADER, "1")
            .timeout(PROBE_TIMEOUT);
        for (name, value) in &mutation.headers {
            // Entity-body headers make no sense on a GET.
            if name.eq_ignore_ascii_case("content-type")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(token) = &self.bearer_token {
            if !has_authorization(&mutation.headers) {
                req = req.bearer_auth(token);
            }
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(id = %mutation.id, error = %err, "conflict probe failed; replaying");
                return ConflictCheck::NoConflict;
            }
        };

        if !resp.status().is_success() {
            return ConflictCheck::NoConflict;
        }

        let entity: Value = match resp.json().await {
            Ok(entity) => entity,
            Err(_) => return ConflictCheck::NoConflict,
        };

        let Some(server_time) = entity_timestamp(&entity) else {
            return ConflictCheck::NoConflict;
        };

        if server_time > mutation.queued_at {
            ConflictCheck::Conflict {
                server_entity: entity,
                server_time,
            }
        } else {
            ConflictCheck::NoConflict
        }
    }
}

/// Whether captured headers already carry an `Authorization` value.
pub(crate) fn has_authorization(headers: &BTreeMap<String, String>) -> bool {
    headers
        .keys()
        .any(|name| name.eq_ignore_ascii_case("authorization"))
}

/// The canonical GET URL for the entity a mutation targets: the mutation URL
/// without query or fragment, provided its last path segment is id-shaped.
fn entity_probe_url(url: &str) -> Option<String> {
    let mut parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if !is_id_shaped(last) {
        return None;
    }
    parsed.set_query(None);
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// UUIDs, 24-char hex (document store ids) and plain numeric ids count.
fn is_id_shaped(segment: &str) -> bool {
    if Uuid::parse_str(segment).is_ok() {
        return true;
    }
    if segment.len() == 24 && segment.chars().all(|c| c.is_ascii_hexdigit()) {
        return true;
    }
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit())
}

/// `updatedAt`, falling back to `createdAt`, parsed as RFC 3339.
fn entity_timestamp(entity: &Value) -> Option<DateTime<Utc>> {
    ["updatedAt", "createdAt"].iter().find_map(|key| {
        entity
            .get(*key)
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    })
}
