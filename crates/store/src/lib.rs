//! `sitesafe-store` holds the storage seams of the offline engine.
//!
//! Two stores, each behind a trait: the durable mutation queue
//! ([`QueueStore`]) and the response cache ([`CacheStore`]). Both come with
//! an in-memory implementation for tests/embedded use and a SQLite-backed
//! one sharing a single database file for the agent.

pub mod cache;
pub mod error;
pub mod queue;
pub mod sqlite;

pub use cache::{CacheNamespace, CacheStore, CachedResponse, InMemoryCacheStore};
pub use error::StoreError;
pub use queue::{InMemoryQueueStore, QueueStore};
pub use sqlite::{offline_db_path, SqliteCacheStore, SqliteQueueStore};
