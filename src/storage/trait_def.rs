use crate::models::{Click, NewClick};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("click store timed out")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Aggregate counts reported by a click store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClickSummary {
    pub total: i64,
    pub since: i64,
    pub unique_destinations: i64,
}

#[async_trait]
pub trait ClickStore: Send + Sync {
    /// Initialize the storage (create tables and indices)
    async fn init(&self) -> Result<()>;

    /// Persist a click and return it with its assigned id
    async fn create(&self, click: &NewClick) -> StorageResult<Click>;

    /// Total clicks, clicks at or after `since` (unix seconds) and the
    /// number of distinct destinations
    async fn summary(&self, since: i64) -> Result<ClickSummary>;
}
