//! Response cache: namespaces, the stored envelope and the store trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Which bucket a cached response lives in. Buckets are trimmed and cleared
/// independently.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// App shell: HTML, scripts, styles, fonts.
    Static,
    /// Navigations and other same-origin page content.
    Dynamic,
    /// GET responses from the API.
    Api,
    /// Image assets, any origin.
    Images,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 4] = [Self::Static, Self::Dynamic, Self::Api, Self::Images];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
            Self::Api => "api",
            Self::Images => "images",
        }
    }

    /// Entry cap applied by [`CacheStore::trim`] unless the host overrides it.
    pub fn default_cap(&self) -> usize {
        match self {
            Self::Static => 64,
            Self::Dynamic => 50,
            Self::Api => 100,
            Self::Images => 60,
        }
    }
}

impl core::fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A response as stored: status, headers, raw body and when it was cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(status: u16, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            cached_at: Utc::now(),
        }
    }

    /// Override the cache timestamp. Tests use this to age entries instead of
    /// injecting a clock.
    pub fn cached_at(mut self, at: DateTime<Utc>) -> Self {
        self.cached_at = at;
        self
    }

    /// Age of the entry in milliseconds, clamped at zero against clock skew.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.cached_at).num_milliseconds().max(0)
    }
}

/// Response cache abstraction.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CachedResponse>, StoreError>;

    /// Insert or overwrite an entry.
    async fn put(
        &self,
        namespace: CacheNamespace,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), StoreError>;

    /// Evict oldest-first until the namespace holds at most `cap` entries.
    /// Returns how many entries were evicted.
    async fn trim(&self, namespace: CacheNamespace, cap: usize) -> Result<usize, StoreError>;

    /// Remove a single entry; removing a missing key is not an error.
    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<(), StoreError>;

    /// Drop every entry in the namespace.
    async fn clear(&self, namespace: CacheNamespace) -> Result<(), StoreError>;

    /// Number of entries in the namespace.
    async fn count(&self, namespace: CacheNamespace) -> Result<usize, StoreError>;
}

#[async_trait::async_trait]
impl<S> CacheStore for Arc<S>
where
    S: CacheStore + ?Sized,
{
    async fn get(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CachedResponse>, StoreError> {
        (**self).get(namespace, key).await
    }

    async fn put(
        &self,
        namespace: CacheNamespace,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), StoreError> {
        (**self).put(namespace, key, response).await
    }

    async fn trim(&self, namespace: CacheNamespace, cap: usize) -> Result<usize, StoreError> {
        (**self).trim(namespace, cap).await
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<(), StoreError> {
        (**self).remove(namespace, key).await
    }

    async fn clear(&self, namespace: CacheNamespace) -> Result<(), StoreError> {
        (**self).clear(namespace).await
    }

    async fn count(&self, namespace: CacheNamespace) -> Result<usize, StoreError> {
        (**self).count(namespace).await
    }
}

/// In-memory cache store for tests and embedded hosts.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore {
    buckets: RwLock<HashMap<CacheNamespace, HashMap<String, CachedResponse>>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CachedResponse>, StoreError> {
        let buckets = self.buckets.read().unwrap();
        Ok(buckets.get(&namespace).and_then(|b| b.get(key)).cloned())
    }

    async fn put(
        &self,
        namespace: CacheNamespace,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().unwrap();
        buckets
            .entry(namespace)
            .or_default()
            .insert(key.to_owned(), response);
        Ok(())
    }

    async fn trim(&self, namespace: CacheNamespace, cap: usize) -> Result<usize, StoreError> {
        let mut buckets = self.buckets.write().unwrap();
        let Some(bucket) = buckets.get_mut(&namespace) else {
            return Ok(0);
        };
        if bucket.len() <= cap {
            return Ok(0);
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = bucket
            .iter()
            .map(|(k, v)| (v.cached_at, k.clone()))
            .collect();
        by_age.sort();

        let excess = bucket.len() - cap;
        for (_, key) in by_age.into_iter().take(excess) {
            bucket.remove(&key);
        }
        Ok(excess)
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().unwrap();
        if let Some(bucket) = buckets.get_mut(&namespace) {
            bucket.remove(key);
        }
        Ok(())
    }

    async fn clear(&self, namespace: CacheNamespace) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().unwrap();
        buckets.remove(&namespace);
        Ok(())
    }

    async fn count(&self, namespace: CacheNamespace) -> Result<usize, StoreError> {
        let buckets = self.buckets.read().unwrap();
        Ok(buckets.get(&namespace).map_or(0, HashMap::len))
    }
}
