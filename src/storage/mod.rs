pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

pub use memory::MemoryClickStore;
pub use postgres::PostgresClickStore;
pub use sqlite::SqliteClickStore;
pub use trait_def::{ClickStore, ClickSummary, StorageError, StorageResult};

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};

/// Connect to the configured click store backend.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn ClickStore>> {
    let store: Arc<dyn ClickStore> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite click store: {}", config.url);
            Arc::new(SqliteClickStore::new(&config.url, config.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL click store");
            Arc::new(PostgresClickStore::new(&config.url, config.max_connections).await?)
        }
    };
    Ok(store)
}
