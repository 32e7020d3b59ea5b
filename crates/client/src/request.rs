//! Transport-neutral request and response envelopes for the gateway.

use std::collections::BTreeMap;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;

use sitesafe_core::PendingMutation;

/// Diagnostic header naming where a response came from:
/// `cache`, `network` or `offline-fallback`.
pub const SERVED_FROM_HEADER: &str = "x-served-from";

/// Diagnostic header carrying a cache hit's age in milliseconds.
pub const CACHE_AGE_HEADER: &str = "x-cache-age-ms";

/// An outgoing request as the application hands it to the gateway.
///
/// Header names are lowercased on insert so lookups are case-insensitive.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl GatewayRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: Vec::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut req = Self::new(Method::POST, url);
        req.body = body.into();
        req.headers
            .insert("content-type".to_owned(), "application/json".to_owned());
        req
    }

    pub fn put(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut req = Self::new(Method::PUT, url);
        req.body = body.into();
        req.headers
            .insert("content-type".to_owned(), "application/json".to_owned());
        req
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Whether the caller is navigating to a page rather than fetching data.
    pub fn wants_html(&self) -> bool {
        self.header("accept")
            .is_some_and(|accept| accept.contains("text/html"))
    }
}

/// What the gateway hands back to the application.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// A response served from a cache namespace, with its age stamped on.
    pub fn from_cache(cached: &sitesafe_store::CachedResponse) -> Self {
        let mut headers = cached.headers.clone();
        headers.insert(SERVED_FROM_HEADER.to_owned(), "cache".to_owned());
        headers.insert(CACHE_AGE_HEADER.to_owned(), cached.age_ms().to_string());
        Self::new(cached.status, headers, cached.body.clone())
    }

    /// A live network response.
    pub fn from_network(status: u16, mut headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        headers.insert(SERVED_FROM_HEADER.to_owned(), "network".to_owned());
        Self::new(status, headers, body)
    }

    /// Synthesized 503 for API reads with neither network nor cache.
    pub fn offline_json() -> Self {
        let body = json!({
            "error": "offline",
            "message": "network unavailable and no cached copy exists"
        });
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_owned(), "application/json".to_owned());
        headers.insert(SERVED_FROM_HEADER.to_owned(), "offline-fallback".to_owned());
        Self::new(503, headers, body.to_string().into_bytes())
    }

    /// The offline fallback page for navigations.
    pub fn offline_page() -> Self {
        const OFFLINE_PAGE: &str = "<!doctype html>\
<html lang=\"en\"><head><meta charset=\"utf-8\"><title>SiteSafe - offline</title></head>\
<body><h1>You are offline</h1>\
<p>SiteSafe could not reach the server. Saved work will sync when the connection returns.</p>\
</body></html>";
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_owned(), "text/html; charset=utf-8".to_owned());
        headers.insert(SERVED_FROM_HEADER.to_owned(), "offline-fallback".to_owned());
        Self::new(503, headers, OFFLINE_PAGE.as_bytes().to_vec())
    }

    /// The 202 a queued mutation answers with: accepted, not yet confirmed.
    pub fn accepted_offline(mutation: &PendingMutation) -> Self {
        let body = json!({
            "offline": true,
            "pendingId": mutation.id,
            "queuedAt": mutation.queued_at_millis(),
        });
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_owned(), "application/json".to_owned());
        headers.insert(SERVED_FROM_HEADER.to_owned(), "offline-fallback".to_owned());
        Self::new(202, headers, body.to_string().into_bytes())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::Value;
    use sitesafe_store::CachedResponse;

    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = GatewayRequest::get("http://x/api/incidents").with_header("Accept", "text/html");
        assert_eq!(req.header("accept"), Some("text/html"));
        assert_eq!(req.header("ACCEPT"), Some("text/html"));
        assert!(req.wants_html());
    }

    #[test]
    fn cache_hits_carry_origin_and_age_diagnostics() {
        let cached = CachedResponse::new(200, BTreeMap::new(), b"[]".to_vec());
        let resp = GatewayResponse::from_cache(&cached);
        assert_eq!(resp.header(SERVED_FROM_HEADER), Some("cache"));
        assert!(resp.header(CACHE_AGE_HEADER).is_some());
        assert_eq!(resp.body, b"[]");
    }

    #[test]
    fn accepted_offline_body_names_the_pending_id() {
        let mutation = PendingMutation::new(
            "http://x/api/incidents",
            sitesafe_core::MutationMethod::Create,
            BTreeMap::new(),
            serde_json::json!({"severity": "low"}),
            sitesafe_core::EntityType::new("incidents"),
            sitesafe_core::ConflictStrategy::Merge,
        );
        let resp = GatewayResponse::accepted_offline(&mutation);
        assert_eq!(resp.status, 202);

        let body: Value = resp.json().unwrap();
        assert_eq!(body["offline"], true);
        assert_eq!(body["pendingId"], mutation.id.to_string());
        assert_eq!(body["queuedAt"], mutation.queued_at_millis());
    }

    #[test]
    fn offline_fallbacks_are_503() {
        assert_eq!(GatewayResponse::offline_json().status, 503);
        assert_eq!(GatewayResponse::offline_page().status, 503);
        assert!(!GatewayResponse::offline_page().is_success());
    }
}
