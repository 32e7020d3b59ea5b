//! Engine configuration and the per-route freshness table.

use std::collections::HashMap;
use std::time::Duration;

use sitesafe_core::ConflictPolicy;
use sitesafe_store::CacheNamespace;

/// How eagerly a cached API route is kept fresh.
#[derive(Debug, Copy, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Refreshed in the background even when served from cache, and
    /// re-fetched opportunistically by the worker.
    High,
    Medium,
    Low,
}

/// Freshness policy of one API route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Cache entries older than this go back to the network.
    pub max_age: Duration,
    pub priority: Priority,
}

impl RoutePolicy {
    pub const fn new(max_age: Duration, priority: Priority) -> Self {
        Self { max_age, priority }
    }

    pub fn max_age_ms(&self) -> i64 {
        self.max_age.as_millis() as i64
    }
}

/// Freshness window applied to routes missing from the table.
const DEFAULT_ROUTE_POLICY: RoutePolicy =
    RoutePolicy::new(Duration::from_secs(60), Priority::Low);

/// Per-route freshness table, matched by longest prefix.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<(String, RoutePolicy)>,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn with_route(mut self, prefix: impl Into<String>, policy: RoutePolicy) -> Self {
        let prefix = prefix.into();
        self.routes.retain(|(p, _)| *p != prefix);
        self.routes.push((prefix, policy));
        self
    }

    /// Longest-prefix lookup; unlisted paths get a short low-priority window.
    pub fn lookup(&self, path: &str) -> RoutePolicy {
        self.routes
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, policy)| *policy)
            .unwrap_or(DEFAULT_ROUTE_POLICY)
    }

    /// Routes the worker refreshes opportunistically while online.
    pub fn high_priority(&self) -> impl Iterator<Item = &str> {
        self.routes
            .iter()
            .filter(|(_, policy)| policy.priority == Priority::High)
            .map(|(prefix, _)| prefix.as_str())
    }
}

impl Default for RouteTable {
    /// The shipped table for the SiteSafe API.
    ///
    /// Incident and action lists drive the field crews' main screens, so
    /// they stay hot. Training and OSHA views change slowly.
    fn default() -> Self {
        let minutes = |m: u64| Duration::from_secs(m * 60);
        Self::empty()
            .with_route("/api/incidents", RoutePolicy::new(minutes(3), Priority::High))
            .with_route("/api/actions", RoutePolicy::new(minutes(3), Priority::High))
            .with_route("/api/dashboard", RoutePolicy::new(minutes(2), Priority::High))
            .with_route("/api/inspections", RoutePolicy::new(minutes(5), Priority::Medium))
            .with_route("/api/permits", RoutePolicy::new(minutes(5), Priority::Medium))
            .with_route("/api/trainings", RoutePolicy::new(minutes(10), Priority::Low))
            .with_route("/api/osha-logs", RoutePolicy::new(minutes(10), Priority::Low))
    }
}

/// Everything the engine needs to know about its environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Origin of the SiteSafe API, no trailing slash (`http://host:port`).
    pub api_base: String,
    /// Path prefix identifying API requests.
    pub api_prefix: String,
    /// Bearer token attached to outgoing requests that carry no
    /// `Authorization` of their own.
    pub bearer_token: Option<String>,
    pub routes: RouteTable,
    pub policy: ConflictPolicy,
    /// Failed replay attempts before a mutation is parked.
    pub retry_ceiling: u32,
    /// Bound on the API caching strategy's network leg.
    pub request_timeout: Duration,
    /// Background worker tick.
    pub poll_interval: Duration,
    /// App-shell paths served strictly cache-first.
    pub app_shell: Vec<String>,
    cache_caps: HashMap<CacheNamespace, usize>,
}

impl EngineConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_owned();
        Self {
            api_base,
            api_prefix: "/api/".to_owned(),
            bearer_token: None,
            routes: RouteTable::default(),
            policy: ConflictPolicy::default(),
            retry_ceiling: sitesafe_sync::DEFAULT_RETRY_CEILING,
            request_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(30),
            app_shell: vec![
                "/".to_owned(),
                "/index.html".to_owned(),
                "/offline.html".to_owned(),
                "/assets/app.js".to_owned(),
                "/assets/app.css".to_owned(),
                "/assets/logo.svg".to_owned(),
            ],
            cache_caps: HashMap::new(),
        }
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn with_route(mut self, prefix: impl Into<String>, policy: RoutePolicy) -> Self {
        self.routes = self.routes.with_route(prefix, policy);
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_cache_cap(mut self, namespace: CacheNamespace, cap: usize) -> Self {
        self.cache_caps.insert(namespace, cap);
        self
    }

    /// Entry cap for a namespace, falling back to the store's default.
    pub fn cache_cap(&self, namespace: CacheNamespace) -> usize {
        self.cache_caps
            .get(&namespace)
            .copied()
            .unwrap_or_else(|| namespace.default_cap())
    }

    /// Absolute URL for an API path.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_prefers_the_longest_matching_prefix() {
        let table = RouteTable::empty()
            .with_route("/api", RoutePolicy::new(Duration::from_secs(60), Priority::Low))
            .with_route(
                "/api/incidents",
                RoutePolicy::new(Duration::from_secs(180), Priority::High),
            );

        assert_eq!(table.lookup("/api/incidents/42").priority, Priority::High);
        assert_eq!(table.lookup("/api/permits").priority, Priority::Low);
    }

    #[test]
    fn unlisted_routes_get_the_sixty_second_default() {
        let table = RouteTable::default();
        let policy = table.lookup("/api/exports");
        assert_eq!(policy.max_age, Duration::from_secs(60));
        assert_eq!(policy.priority, Priority::Low);
    }

    #[test]
    fn re_adding_a_route_replaces_its_policy() {
        let table = RouteTable::default().with_route(
            "/api/incidents",
            RoutePolicy::new(Duration::from_secs(1), Priority::Low),
        );
        assert_eq!(
            table.lookup("/api/incidents").max_age,
            Duration::from_secs(1)
        );
    }

    #[test]
    fn high_priority_routes_are_enumerable() {
        let table = RouteTable::default();
        let high: Vec<_> = table.high_priority().collect();
        assert!(high.contains(&"/api/incidents"));
        assert!(!high.contains(&"/api/trainings"));
    }

    #[test]
    fn config_normalizes_the_api_base() {
        let config = EngineConfig::new("http://localhost:8080/");
        assert_eq!(config.api_url("/api/incidents"), "http://localhost:8080/api/incidents");
    }

    #[test]
    fn cache_caps_fall_back_to_namespace_defaults() {
        let config = EngineConfig::default().with_cache_cap(CacheNamespace::Api, 10);
        assert_eq!(config.cache_cap(CacheNamespace::Api), 10);
        assert_eq!(
            config.cache_cap(CacheNamespace::Images),
            CacheNamespace::Images.default_cap()
        );
    }
}
