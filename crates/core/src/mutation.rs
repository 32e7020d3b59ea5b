//! The durable mutation record and its verb/status vocabulary.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::entity::EntityType;
use crate::error::DomainError;
use crate::id::MutationId;
use crate::policy::ConflictStrategy;

/// Key under which a non-JSON request body is preserved verbatim.
pub const RAW_BODY_KEY: &str = "rawBody";

/// Verb class of a queued mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationMethod {
    Create,
    Update,
    Delete,
}

impl MutationMethod {
    /// Classify an HTTP method. `PATCH` counts as an update; safe reads and
    /// anything exotic return `None`.
    pub fn from_http(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "POST" => Some(Self::Create),
            "PUT" | "PATCH" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    /// The HTTP verb used on replay. Updates replay as `PUT`: the SiteSafe
    /// API treats entity updates as full-document writes.
    pub fn as_http(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PUT",
            Self::Delete => "DELETE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Self::Update)
    }
}

impl core::fmt::Display for MutationMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationMethod {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(DomainError::parse(format!("unknown mutation verb: {other}"))),
        }
    }
}

/// Queue lifecycle of a mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    /// Waiting to be replayed.
    Pending,
    /// Exhausted the retry ceiling; parked for operator attention, never
    /// replayed again.
    Abandoned,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

impl FromStr for MutationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(DomainError::parse(format!(
                "unknown mutation status: {other}"
            ))),
        }
    }
}

/// A write captured while the network was unavailable, persisted until a
/// sync pass replays it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Unique id, time-ordered.
    pub id: MutationId,
    /// Absolute request URL.
    pub url: String,
    /// Verb class (create/update/delete).
    pub method: MutationMethod,
    /// Headers captured from the original request (auth included).
    pub headers: BTreeMap<String, String>,
    /// JSON body, or `{"rawBody": ...}` when the original was not JSON.
    pub body: Value,
    /// Collection the mutation targets, e.g. `incidents`.
    pub entity_type: EntityType,
    /// Resolution strategy stamped at enqueue time.
    pub strategy: ConflictStrategy,
    /// Failed replay attempts so far.
    pub retry_count: u32,
    /// Current lifecycle state.
    pub status: MutationStatus,
    /// When the mutation was captured.
    pub queued_at: DateTime<Utc>,
}

impl PendingMutation {
    pub fn new(
        url: impl Into<String>,
        method: MutationMethod,
        headers: BTreeMap<String, String>,
        body: Value,
        entity_type: EntityType,
        strategy: ConflictStrategy,
    ) -> Self {
        Self {
            id: MutationId::new(),
            url: url.into(),
            method,
            headers,
            body,
            entity_type,
            strategy,
            retry_count: 0,
            status: MutationStatus::Pending,
            queued_at: Utc::now(),
        }
    }

    /// Enqueue time in epoch milliseconds, as stamped on replay requests.
    pub fn queued_at_millis(&self) -> i64 {
        self.queued_at.timestamp_millis()
    }

    /// Sort key for replay: enqueue time first, id as the tie-breaker.
    pub fn replay_key(&self) -> (DateTime<Utc>, MutationId) {
        (self.queued_at, self.id)
    }

    /// Parse a request body for storage.
    ///
    /// Valid JSON is kept as-is. Anything else is wrapped under
    /// [`RAW_BODY_KEY`] so no payload is ever dropped. An empty body becomes
    /// `null`.
    pub fn parse_body(bytes: &[u8]) -> Value {
        if bytes.is_empty() {
            return Value::Null;
        }
        match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(_) => json!({ RAW_BODY_KEY: String::from_utf8_lossy(bytes).into_owned() }),
        }
    }

    /// If `body` is a raw-body wrapper, return the original payload so replay
    /// can send it byte-identical instead of JSON-wrapped.
    pub fn raw_body(body: &Value) -> Option<&str> {
        let obj = body.as_object()?;
        if obj.len() != 1 {
            return None;
        }
        obj.get(RAW_BODY_KEY)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_verbs_classify_into_verb_classes() {
        assert_eq!(MutationMethod::from_http("POST"), Some(MutationMethod::Create));
        assert_eq!(MutationMethod::from_http("put"), Some(MutationMethod::Update));
        assert_eq!(MutationMethod::from_http("PATCH"), Some(MutationMethod::Update));
        assert_eq!(MutationMethod::from_http("DELETE"), Some(MutationMethod::Delete));
        assert_eq!(MutationMethod::from_http("GET"), None);
        assert_eq!(MutationMethod::from_http("HEAD"), None);
    }

    #[test]
    fn json_bodies_are_stored_as_is() {
        let body = PendingMutation::parse_body(br#"{"severity":"high"}"#);
        assert_eq!(body, json!({"severity": "high"}));
    }

    #[test]
    fn non_json_bodies_are_wrapped_not_dropped() {
        let body = PendingMutation::parse_body(b"severity=high&site=12");
        assert_eq!(body, json!({ RAW_BODY_KEY: "severity=high&site=12" }));
        assert_eq!(
            PendingMutation::raw_body(&body),
            Some("severity=high&site=12")
        );
    }

    #[test]
    fn empty_bodies_become_null() {
        assert_eq!(PendingMutation::parse_body(b""), Value::Null);
    }

    #[test]
    fn ordinary_objects_are_not_mistaken_for_raw_wrappers() {
        let body = json!({ RAW_BODY_KEY: "x", "other": 1 });
        assert_eq!(PendingMutation::raw_body(&body), None);
        assert_eq!(PendingMutation::raw_body(&json!({"a": 1})), None);
    }

    #[test]
    fn new_mutations_start_pending_with_zero_retries() {
        let m = PendingMutation::new(
            "https://app.sitesafe.io/api/incidents",
            MutationMethod::Create,
            BTreeMap::new(),
            json!({"severity": "low"}),
            EntityType::new("incidents"),
            ConflictStrategy::Merge,
        );
        assert_eq!(m.status, MutationStatus::Pending);
        assert_eq!(m.retry_count, 0);
        assert!(!m.status.is_terminal());
    }
}
