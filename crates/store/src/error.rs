//! Storage error shared by the queue and cache stores.

use sitesafe_core::MutationId;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("mutation not found: {0}")]
    NotFound(MutationId),
    #[error("mutation already queued: {0}")]
    AlreadyExists(MutationId),
    #[error("storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Wrap an infrastructure failure, flattening the error chain into the
    /// message.
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        Self::Storage(format!("{:#}", err.into()))
    }
}
