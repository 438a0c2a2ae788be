use crate::models::{Click, NewClick};
use crate::storage::{ClickStore, ClickSummary, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::types::Json;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteClickStore {
    pool: Arc<SqlitePool>,
}

impl SqliteClickStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

#[async_trait]
impl ClickStore for SqliteClickStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS affiliate_tracker_clicks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                destination_url TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                referer TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                clicked_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clicks_destination_url
            ON affiliate_tracker_clicks(destination_url)
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_clicks_clicked_at
            ON affiliate_tracker_clicks(clicked_at)
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn create(&self, click: &NewClick) -> StorageResult<Click> {
        let row = sqlx::query_as::<_, Click>(
            r#"
            INSERT INTO affiliate_tracker_clicks
                (destination_url, ip_address, user_agent, referer, metadata, clicked_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, destination_url, ip_address, user_agent, referer, metadata, clicked_at
            "#,
        )
        .bind(&click.destination_url)
        .bind(&click.ip_address)
        .bind(&click.user_agent)
        .bind(&click.referer)
        .bind(Json(&click.metadata))
        .bind(click.clicked_at)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| StorageError::Other(e.into()))?;

        Ok(row)
    }

    async fn summary(&self, since: i64) -> Result<ClickSummary> {
        let (total, recent, unique_destinations) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN clicked_at >= ? THEN 1 ELSE 0 END), 0),
                COUNT(DISTINCT destination_url)
            FROM affiliate_tracker_clicks
            "#,
        )
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(ClickSummary {
            total,
            since: recent,
            unique_destinations,
        })
    }
}
