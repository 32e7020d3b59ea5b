//! SQLite-backed queue and cache stores.
//!
//! Both stores share one database file so the agent carries a single
//! `offline.db`. Timestamps are stored as fixed-width RFC 3339 text
//! (microsecond precision, `Z` suffix) so lexicographic `ORDER BY` is
//! chronological.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use sitesafe_core::{MutationId, MutationStatus, PendingMutation};

use crate::cache::{CacheNamespace, CacheStore, CachedResponse};
use crate::error::StoreError;
use crate::queue::QueueStore;

/// Resolve the agent's database path: `{app_data_dir}/sitesafe/offline.db`.
pub fn offline_db_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

    let mut dir = base;
    dir.push("sitesafe");

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory at {dir:?}"))?;

    dir.push("offline.db");

    Ok(dir)
}

/// Open (creating if missing) the SQLite database at `path`.
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory at {parent:?}"))
            .map_err(StoreError::storage)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);

    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(StoreError::storage)?;

    tracing::debug!(path = %path.display(), "opened offline database");
    Ok(pool)
}

fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp in store: {s}"))
}

/// SQLite-backed mutation queue.
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    /// Create the table (if needed) and return the store.
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mutation_queue (
                id           TEXT PRIMARY KEY,
                url          TEXT NOT NULL,
                method       TEXT NOT NULL,
                headers      TEXT NOT NULL,
                body         TEXT NOT NULL,
                entity_type  TEXT NOT NULL,
                strategy     TEXT NOT NULL,
                status       TEXT NOT NULL,
                retry_count  INTEGER NOT NULL,
                queued_at    TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create mutation_queue table")
        .map_err(StoreError::storage)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_mutation_queue_status_queued
            ON mutation_queue (status, queued_at)
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create mutation_queue index")
        .map_err(StoreError::storage)?;

        Ok(Self { pool })
    }

    /// Open the store on its own database file.
    pub async fn open_at(path: &Path) -> Result<Self, StoreError> {
        let pool = connect(path).await?;
        Self::open(pool).await
    }

    async fn list_by_status(&self, status: MutationStatus) -> Result<Vec<PendingMutation>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, method, headers, body, entity_type, strategy,
                   status, retry_count, queued_at
            FROM mutation_queue
            WHERE status = ?1
            ORDER BY queued_at ASC, id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        rows.iter()
            .map(|row| row_to_mutation(row).map_err(StoreError::storage))
            .collect()
    }
}

#[async_trait::async_trait]
impl QueueStore for SqliteQueueStore {
    async fn enqueue(&self, mutation: PendingMutation) -> Result<MutationId, StoreError> {
        let headers = serde_json::to_string(&mutation.headers)
            .context("failed to serialize mutation headers")
            .map_err(StoreError::storage)?;
        let body = serde_json::to_string(&mutation.body)
            .context("failed to serialize mutation body")
            .map_err(StoreError::storage)?;

        sqlx::query(
            r#"
            INSERT INTO mutation_queue (
                id, url, method, headers, body, entity_type, strategy,
                status, retry_count, queued_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(mutation.id.to_string())
        .bind(&mutation.url)
        .bind(mutation.method.as_str())
        .bind(&headers)
        .bind(&body)
        .bind(mutation.entity_type.as_str())
        .bind(mutation.strategy.as_str())
        .bind(mutation.status.as_str())
        .bind(mutation.retry_count as i64)
        .bind(fmt_ts(mutation.queued_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::AlreadyExists(mutation.id)
            }
            _ => StoreError::storage(e),
        })?;

        Ok(mutation.id)
    }

    async fn get(&self, id: MutationId) -> Result<Option<PendingMutation>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, url, method, headers, body, entity_type, strategy,
                   status, retry_count, queued_at
            FROM mutation_queue
            WHERE id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        match row {
            Some(row) => Ok(Some(row_to_mutation(&row).map_err(StoreError::storage)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, mutation: &PendingMutation) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET retry_count = ?1, status = ?2
            WHERE id = ?3
            "#,
        )
        .bind(mutation.retry_count as i64)
        .bind(mutation.status.as_str())
        .bind(mutation.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(mutation.id));
        }
        Ok(())
    }

    async fn delete(&self, id: MutationId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM mutation_queue WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<PendingMutation>, StoreError> {
        self.list_by_status(MutationStatus::Pending).await
    }

    async fn depth(&self) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mutation_queue WHERE status = ?1")
            .bind(MutationStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        let n: i64 = row.try_get("n").map_err(StoreError::storage)?;
        Ok(n as usize)
    }

    async fn list_abandoned(&self) -> Result<Vec<PendingMutation>, StoreError> {
        self.list_by_status(MutationStatus::Abandoned).await
    }

    async fn purge_abandoned(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM mutation_queue
            WHERE status = ?1 AND queued_at < ?2
            "#,
        )
        .bind(MutationStatus::Abandoned.as_str())
        .bind(fmt_ts(older_than))
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        Ok(result.rows_affected() as usize)
    }
}

fn row_to_mutation(row: &SqliteRow) -> anyhow::Result<PendingMutation> {
    let id_str: String = row.try_get("id")?;
    let id = id_str
        .parse::<MutationId>()
        .context("invalid id in mutation_queue")?;

    let url: String = row.try_get("url")?;

    let method_str: String = row.try_get("method")?;
    let method = method_str
        .parse()
        .context("invalid method in mutation_queue")?;

    let headers_str: String = row.try_get("headers")?;
    let headers =
        serde_json::from_str(&headers_str).context("invalid headers in mutation_queue")?;

    let body_str: String = row.try_get("body")?;
    let body = serde_json::from_str(&body_str).context("invalid body in mutation_queue")?;

    let entity_str: String = row.try_get("entity_type")?;

    let strategy_str: String = row.try_get("strategy")?;
    let strategy = strategy_str
        .parse()
        .context("invalid strategy in mutation_queue")?;

    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse()
        .context("invalid status in mutation_queue")?;

    let retry_count: i64 = row.try_get("retry_count")?;

    let queued_at_str: String = row.try_get("queued_at")?;
    let queued_at = parse_ts(&queued_at_str)?;

    Ok(PendingMutation {
        id,
        url,
        method,
        headers,
        body,
        entity_type: sitesafe_core::EntityType::new(entity_str),
        strategy,
        retry_count: retry_count as u32,
        status,
        queued_at,
    })
}

/// SQLite-backed response cache.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Create the table (if needed) and return the store.
    pub async fn open(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                namespace  TEXT NOT NULL,
                cache_key  TEXT NOT NULL,
                status     INTEGER NOT NULL,
                headers    TEXT NOT NULL,
                body       BLOB NOT NULL,
                cached_at  TEXT NOT NULL,
                PRIMARY KEY (namespace, cache_key)
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create response_cache table")
        .map_err(StoreError::storage)?;

        Ok(Self { pool })
    }

    /// Open the store on its own database file.
    pub async fn open_at(path: &Path) -> Result<Self, StoreError> {
        let pool = connect(path).await?;
        Self::open(pool).await
    }
}

#[async_trait::async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Result<Option<CachedResponse>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT status, headers, body, cached_at
            FROM response_cache
            WHERE namespace = ?1 AND cache_key = ?2
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let response = row_to_response(&row).map_err(StoreError::storage)?;
        Ok(Some(response))
    }

    async fn put(
        &self,
        namespace: CacheNamespace,
        key: &str,
        response: CachedResponse,
    ) -> Result<(), StoreError> {
        let headers = serde_json::to_string(&response.headers)
            .context("failed to serialize cached headers")
            .map_err(StoreError::storage)?;

        sqlx::query(
            r#"
            INSERT INTO response_cache (namespace, cache_key, status, headers, body, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(namespace, cache_key)
            DO UPDATE SET
                status = excluded.status,
                headers = excluded.headers,
                body = excluded.body,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(namespace.as_str())
        .bind(key)
        .bind(response.status as i64)
        .bind(&headers)
        .bind(&response.body)
        .bind(fmt_ts(response.cached_at))
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        Ok(())
    }

    async fn trim(&self, namespace: CacheNamespace, cap: usize) -> Result<usize, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM response_cache
            WHERE namespace = ?1
              AND cache_key NOT IN (
                SELECT cache_key FROM response_cache
                WHERE namespace = ?1
                ORDER BY cached_at DESC, cache_key DESC
                LIMIT ?2
              )
            "#,
        )
        .bind(namespace.as_str())
        .bind(cap as i64)
        .execute(&self.pool)
        .await
        .map_err(StoreError::storage)?;

        Ok(result.rows_affected() as usize)
    }

    async fn remove(&self, namespace: CacheNamespace, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM response_cache WHERE namespace = ?1 AND cache_key = ?2")
            .bind(namespace.as_str())
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    async fn clear(&self, namespace: CacheNamespace) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM response_cache WHERE namespace = ?1")
            .bind(namespace.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::storage)?;
        Ok(())
    }

    async fn count(&self, namespace: CacheNamespace) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM response_cache WHERE namespace = ?1")
            .bind(namespace.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::storage)?;

        let n: i64 = row.try_get("n").map_err(StoreError::storage)?;
        Ok(n as usize)
    }
}

fn row_to_response(row: &SqliteRow) -> anyhow::Result<CachedResponse> {
    let status: i64 = row.try_get("status")?;
    let status = u16::try_from(status).context("status out of range in response_cache")?;

    let headers_str: String = row.try_get("headers")?;
    let headers =
        serde_json::from_str(&headers_str).context("invalid headers in response_cache")?;

    let body: Vec<u8> = row.try_get("body")?;

    let cached_at_str: String = row.try_get("cached_at")?;
    let cached_at = parse_ts(&cached_at_str)?;

    Ok(CachedResponse {
        status,
        headers,
        body,
        cached_at,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use serde_json::json;
    use sitesafe_core::{ConflictStrategy, EntityType, MutationMethod};

    use super::*;

    fn mutation() -> PendingMutation {
        let mut headers = BTreeMap::new();
        headers.insert("authorization".to_owned(), "Bearer token-1".to_owned());
        headers.insert("content-type".to_owned(), "application/json".to_owned());
        PendingMutation::new(
            "https://app.sitesafe.io/api/incidents/42",
            MutationMethod::Update,
            headers,
            json!({"severity": "high", "tags": ["ppe"]}),
            EntityType::new("incidents"),
            ConflictStrategy::Merge,
        )
    }

    async fn open_stores(dir: &tempfile::TempDir) -> (SqliteQueueStore, SqliteCacheStore) {
        let path = dir.path().join("offline.db");
        let pool = connect(&path).await.unwrap();
        let queue = SqliteQueueStore::open(pool.clone()).await.unwrap();
        let cache = SqliteCacheStore::open(pool).await.unwrap();
        (queue, cache)
    }

    #[tokio::test]
    async fn queue_round_trips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _) = open_stores(&dir).await;

        let m = mutation();
        queue.enqueue(m.clone()).await.unwrap();

        let loaded = queue.get(m.id).await.unwrap().unwrap();
        assert_eq!(loaded.url, m.url);
        assert_eq!(loaded.method, m.method);
        assert_eq!(loaded.headers, m.headers);
        assert_eq!(loaded.body, m.body);
        assert_eq!(loaded.entity_type, m.entity_type);
        assert_eq!(loaded.strategy, m.strategy);
        assert_eq!(loaded.status, m.status);
        assert_eq!(loaded.retry_count, 0);
        // Microsecond precision survives the fixed-width text column.
        assert_eq!(
            loaded.queued_at.timestamp_micros(),
            m.queued_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offline.db");

        let m = mutation();
        {
            let queue = SqliteQueueStore::open_at(&path).await.unwrap();
            queue.enqueue(m.clone()).await.unwrap();
        }

        let queue = SqliteQueueStore::open_at(&path).await.unwrap();
        assert_eq!(queue.depth().await.unwrap(), 1);
        let loaded = queue.get(m.id).await.unwrap().unwrap();
        assert_eq!(loaded.body, m.body);
    }

    #[tokio::test]
    async fn pending_listing_is_ordered_and_skips_abandoned() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _) = open_stores(&dir).await;

        let mut first = mutation();
        first.queued_at = Utc::now() - Duration::seconds(30);
        let mut second = mutation();
        second.queued_at = Utc::now() - Duration::seconds(20);
        let mut parked = mutation();
        parked.queued_at = Utc::now() - Duration::seconds(10);
        parked.status = MutationStatus::Abandoned;

        queue.enqueue(second.clone()).await.unwrap();
        queue.enqueue(parked.clone()).await.unwrap();
        queue.enqueue(first.clone()).await.unwrap();

        let ids: Vec<_> = queue
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);

        let abandoned = queue.list_abandoned().await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].id, parked.id);
    }

    #[tokio::test]
    async fn update_persists_retry_count_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _) = open_stores(&dir).await;

        let mut m = mutation();
        queue.enqueue(m.clone()).await.unwrap();

        m.retry_count = 5;
        m.status = MutationStatus::Abandoned;
        queue.update(&m).await.unwrap();

        let loaded = queue.get(m.id).await.unwrap().unwrap();
        assert_eq!(loaded.retry_count, 5);
        assert_eq!(loaded.status, MutationStatus::Abandoned);
    }

    #[tokio::test]
    async fn duplicate_enqueue_maps_to_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _) = open_stores(&dir).await;

        let m = mutation();
        queue.enqueue(m.clone()).await.unwrap();
        assert!(matches!(
            queue.enqueue(m).await,
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn cache_upsert_overwrites_and_trim_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = open_stores(&dir).await;

        let now = Utc::now();
        for (key, age_min, body) in [("a", 30, "old"), ("b", 20, "mid"), ("c", 10, "new")] {
            let entry = CachedResponse::new(200, BTreeMap::new(), body.as_bytes().to_vec())
                .cached_at(now - Duration::minutes(age_min));
            cache.put(CacheNamespace::Api, key, entry).await.unwrap();
        }

        // Upsert refreshes the timestamp and body of "a".
        let refreshed = CachedResponse::new(200, BTreeMap::new(), b"fresh".to_vec());
        cache
            .put(CacheNamespace::Api, "a", refreshed)
            .await
            .unwrap();

        let evicted = cache.trim(CacheNamespace::Api, 2).await.unwrap();
        assert_eq!(evicted, 1);
        // "b" was oldest after the upsert and got evicted.
        assert!(cache.get(CacheNamespace::Api, "b").await.unwrap().is_none());
        let hit = cache.get(CacheNamespace::Api, "a").await.unwrap().unwrap();
        assert_eq!(hit.body, b"fresh");
    }

    #[tokio::test]
    async fn cache_body_bytes_round_trip_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let (_, cache) = open_stores(&dir).await;

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_owned(), "image/png".to_owned());
        let body = vec![0x89, 0x50, 0x4e, 0x47, 0x00, 0xff];
        cache
            .put(
                CacheNamespace::Images,
                "https://cdn.sitesafe.io/logo.png",
                CachedResponse::new(200, headers.clone(), body.clone()),
            )
            .await
            .unwrap();

        let hit = cache
            .get(CacheNamespace::Images, "https://cdn.sitesafe.io/logo.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.body, body);
        assert_eq!(hit.headers, headers);
    }
}
