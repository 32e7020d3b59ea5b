//! The request gateway: every outgoing request is classified here and routed
//! to a caching strategy or the offline mutation queue.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Method;
use thiserror::Error;

use sitesafe_core::MutationMethod;
use sitesafe_store::{CacheNamespace, CacheStore, CachedResponse, StoreError};
use sitesafe_sync::{OfflineMutationQueue, SyncError};

use crate::config::{EngineConfig, Priority};
use crate::connectivity::{ConnectivityMonitor, SharedConnectivity};
use crate::request::{GatewayRequest, GatewayResponse, SERVED_FROM_HEADER};

/// File extensions treated as images regardless of the Accept header.
const IMAGE_EXTENSIONS: [&str; 8] = [
    ".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".ico", ".avif",
];

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Which handling strategy a request gets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestClass {
    /// Straight to the network; no caching, no queueing.
    Passthrough,
    /// A write bound for the API.
    Mutation(MutationMethod),
    /// A read bound for the API; freshness-window caching.
    ApiRead,
    /// Cache-first with opportunistic background refresh.
    Image,
    /// App shell asset; strict cache-first.
    AppShell,
    /// Everything else; stale-while-revalidate.
    Dynamic,
}

/// Classify a request against the engine configuration.
pub fn classify(config: &EngineConfig, req: &GatewayRequest) -> RequestClass {
    if let Ok(url) = reqwest::Url::parse(&req.url) {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return RequestClass::Passthrough;
        }
    }

    let path = path_of(&req.url);
    let under_api = path.starts_with(&config.api_prefix);

    if req.method != Method::GET && req.method != Method::HEAD {
        if under_api {
            if let Some(method) = MutationMethod::from_http(req.method.as_str()) {
                return RequestClass::Mutation(method);
            }
        }
        return RequestClass::Passthrough;
    }

    if under_api {
        return RequestClass::ApiRead;
    }
    if is_image(req, &path) {
        return RequestClass::Image;
    }
    if config.app_shell.iter().any(|asset| *asset == path) {
        return RequestClass::AppShell;
    }
    RequestClass::Dynamic
}

fn is_image(req: &GatewayRequest, path: &str) -> bool {
    if req
        .header("accept")
        .is_some_and(|accept| accept.starts_with("image/"))
    {
        return true;
    }
    let path = path.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Path component of `url`; relative URLs are taken as already-bare paths.
fn path_of(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        return parsed.path().to_owned();
    }
    url.split(['?', '#']).next().unwrap_or(url).to_owned()
}

/// The single entry point for all of the application's network traffic.
pub struct Gateway {
    config: Arc<EngineConfig>,
    cache: Arc<dyn CacheStore>,
    queue: Arc<OfflineMutationQueue>,
    connectivity: Arc<SharedConnectivity>,
    http: reqwest::Client,
}

impl Gateway {
    pub fn new(
        config: Arc<EngineConfig>,
        cache: Arc<dyn CacheStore>,
        queue: Arc<OfflineMutationQueue>,
        connectivity: Arc<SharedConnectivity>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            cache,
            queue,
            connectivity,
            http,
        }
    }

    /// Dispatch one request through its strategy.
    ///
    /// Relative URLs are resolved against the configured API base first, so
    /// callers may pass bare paths.
    pub async fn dispatch(&self, mut req: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        if req.url.starts_with('/') {
            req.url = self.config.api_url(&req.url);
        }

        match classify(&self.config, &req) {
            RequestClass::Passthrough => Ok(self.passthrough(&req).await),
            RequestClass::Mutation(method) => self.mutation(&req, method).await,
            RequestClass::ApiRead => self.api_read(&req).await,
            RequestClass::Image => self.image_read(&req).await,
            RequestClass::AppShell => self.app_shell_read(&req).await,
            RequestClass::Dynamic => self.dynamic_read(&req).await,
        }
    }

    async fn passthrough(&self, req: &GatewayRequest) -> GatewayResponse {
        match self.fetch(req).await {
            Ok(resp) => resp,
            Err(err) => {
                tracing::debug!(url = %req.url, error = %err, "passthrough request failed");
                GatewayResponse::offline_json()
            }
        }
    }

    /// Writes attempt the network first; offline is detected empirically
    /// per-request, not from the flag alone.
    async fn mutation(
        &self,
        req: &GatewayRequest,
        method: MutationMethod,
    ) -> Result<GatewayResponse, GatewayError> {
        if self.connectivity.is_online() {
            match self.fetch(req).await {
                // The server answered; any status is the caller's to handle.
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    tracing::info!(url = %req.url, error = %err, "mutation failed to send; queueing");
                }
            }
        }

        let mutation = self
            .queue
            .capture(&req.url, method, req.headers.clone(), &req.body)
            .await?;
        Ok(GatewayResponse::accepted_offline(&mutation))
    }

    /// Freshness-window caching for API reads.
    async fn api_read(&self, req: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let policy = self.config.routes.lookup(&path_of(&req.url));
        let cacheable = req.method == Method::GET;

        let cached = if cacheable {
            self.cache.get(CacheNamespace::Api, &req.url).await?
        } else {
            None
        };

        if let Some(entry) = &cached {
            if entry.age_ms() < policy.max_age_ms() {
                if policy.priority == Priority::High && self.connectivity.is_online() {
                    self.spawn_refresh(CacheNamespace::Api, &req.url);
                }
                return Ok(GatewayResponse::from_cache(entry));
            }
        }

        let attempt = tokio::time::timeout(self.config.request_timeout, self.fetch(req)).await;
        let outcome = match attempt {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_elapsed) => Err("request timed out".to_owned()),
        };

        match outcome {
            Ok(resp) if resp.is_success() && cacheable => {
                self.store_response(CacheNamespace::Api, &req.url, &resp)
                    .await?;
                Ok(resp)
            }
            Ok(resp) => Ok(resp),
            Err(reason) => {
                tracing::debug!(url = %req.url, reason = %reason, "API fetch failed");
                // Stale beats nothing.
                match cached {
                    Some(entry) => Ok(GatewayResponse::from_cache(&entry)),
                    None => Ok(GatewayResponse::offline_json()),
                }
            }
        }
    }

    /// Cache-first with opportunistic background refresh.
    async fn image_read(&self, req: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        if let Some(entry) = self.cache.get(CacheNamespace::Images, &req.url).await? {
            if self.connectivity.is_online() {
                self.spawn_refresh(CacheNamespace::Images, &req.url);
            }
            return Ok(GatewayResponse::from_cache(&entry));
        }

        match self.fetch(req).await {
            Ok(resp) if resp.is_success() && req.method == Method::GET => {
                self.store_response(CacheNamespace::Images, &req.url, &resp)
                    .await?;
                Ok(resp)
            }
            Ok(resp) => Ok(resp),
            Err(err) => {
                tracing::debug!(url = %req.url, error = %err, "image fetch failed");
                Ok(GatewayResponse::offline_json())
            }
        }
    }

    /// Strict cache-first for the app shell.
    async fn app_shell_read(&self, req: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        if let Some(entry) = self.cache.get(CacheNamespace::Static, &req.url).await? {
            return Ok(GatewayResponse::from_cache(&entry));
        }

        match self.fetch(req).await {
            Ok(resp) if resp.is_success() => {
                self.store_response(CacheNamespace::Static, &req.url, &resp)
                    .await?;
                Ok(resp)
            }
            Ok(resp) => Ok(resp),
            Err(err) => {
                tracing::debug!(url = %req.url, error = %err, "app shell fetch failed");
                Ok(GatewayResponse::offline_page())
            }
        }
    }

    /// Stale-while-revalidate for everything else.
    async fn dynamic_read(&self, req: &GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        if let Some(entry) = self.cache.get(CacheNamespace::Dynamic, &req.url).await? {
            self.spawn_refresh(CacheNamespace::Dynamic, &req.url);
            return Ok(GatewayResponse::from_cache(&entry));
        }

        match self.fetch(req).await {
            Ok(resp) if resp.is_success() && req.method == Method::GET => {
                self.store_response(CacheNamespace::Dynamic, &req.url, &resp)
                    .await?;
                Ok(resp)
            }
            Ok(resp) => Ok(resp),
            Err(err) => {
                tracing::debug!(url = %req.url, error = %err, "dynamic fetch failed");
                if req.wants_html() {
                    Ok(GatewayResponse::offline_page())
                } else {
                    Ok(GatewayResponse::offline_json())
                }
            }
        }
    }

    /// Re-fetch every high-priority API route and refresh its cache entry.
    /// Errors are logged, never surfaced; this is opportunistic work.
    pub async fn refresh_high_priority(&self) {
        let urls: Vec<String> = self
            .config
            .routes
            .high_priority()
            .map(|path| self.config.api_url(path))
            .collect();

        for url in urls {
            if let Err(err) = refresh_into_cache(
                &self.http,
                &self.cache,
                CacheNamespace::Api,
                self.config.cache_cap(CacheNamespace::Api),
                &url,
                self.config.bearer_token.as_deref(),
            )
            .await
            {
                tracing::debug!(url = %url, error = %err, "high-priority refresh failed");
            }
        }
    }

    /// One network round trip with the request's headers (plus the configured
    /// bearer token when the request carries no authorization of its own).
    async fn fetch(&self, req: &GatewayRequest) -> Result<GatewayResponse, reqwest::Error> {
        let mut outgoing = self.http.request(req.method.clone(), &req.url);
        for (name, value) in &req.headers {
            outgoing = outgoing.header(name.as_str(), value.as_str());
        }
        if !req.headers.contains_key("authorization") {
            if let Some(token) = &self.config.bearer_token {
                outgoing = outgoing.bearer_auth(token);
            }
        }
        if !req.body.is_empty() {
            outgoing = outgoing.body(req.body.clone());
        }

        let resp = outgoing.send().await?;
        let status = resp.status().as_u16();
        let headers = response_headers(resp.headers());
        let body = resp.bytes().await?.to_vec();
        Ok(GatewayResponse::from_network(status, headers, body))
    }

    /// Store a network response; trimming happens off the response path.
    async fn store_response(
        &self,
        namespace: CacheNamespace,
        key: &str,
        resp: &GatewayResponse,
    ) -> Result<(), StoreError> {
        // The diagnostics describe this serving, not the stored copy.
        let mut headers = resp.headers.clone();
        headers.remove(SERVED_FROM_HEADER);

        self.cache
            .put(
                namespace,
                key,
                CachedResponse::new(resp.status, headers, resp.body.clone()),
            )
            .await?;

        let cache = Arc::clone(&self.cache);
        let cap = self.config.cache_cap(namespace);
        tokio::spawn(async move {
            if let Err(err) = cache.trim(namespace, cap).await {
                tracing::warn!(namespace = %namespace, error = %err, "cache trim failed");
            }
        });
        Ok(())
    }

    fn spawn_refresh(&self, namespace: CacheNamespace, url: &str) {
        let http = self.http.clone();
        let cache = Arc::clone(&self.cache);
        let cap = self.config.cache_cap(namespace);
        let bearer = self.config.bearer_token.clone();
        let url = url.to_owned();
        tokio::spawn(async move {
            if let Err(err) =
                refresh_into_cache(&http, &cache, namespace, cap, &url, bearer.as_deref()).await
            {
                tracing::debug!(url = %url, error = %err, "background refresh failed");
            }
        });
    }
}

/// Fetch `url` and replace its cache entry, trimming the namespace after.
async fn refresh_into_cache(
    http: &reqwest::Client,
    cache: &Arc<dyn CacheStore>,
    namespace: CacheNamespace,
    cap: usize,
    url: &str,
    bearer: Option<&str>,
) -> anyhow::Result<()> {
    let mut req = http.get(url);
    if let Some(token) = bearer {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("refresh of {url} got status {}", resp.status());
    }

    let status = resp.status().as_u16();
    let headers = response_headers(resp.headers());
    let body = resp.bytes().await?.to_vec();

    cache
        .put(namespace, url, CachedResponse::new(status, headers, body))
        .await?;
    cache.trim(namespace, cap).await?;
    Ok(())
}

/// Lowercased response headers, minus the framing ones the stored body
/// invalidates.
fn response_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str().to_ascii_lowercase();
            if name == "content-length" || name == "transfer-encoding" {
                return None;
            }
            value.to_str().ok().map(|v| (name, v.to_owned()))
        })
        .collect()
}
