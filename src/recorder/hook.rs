use async_trait::async_trait;

use crate::models::Click;

/// Called once for every newly recorded click.
///
/// Errors are logged by the recorder and never undo the persisted click.
#[async_trait]
pub trait ClickHook: Send + Sync {
    async fn on_click(&self, click: &Click) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ClickHook for F
where
    F: Fn(&Click) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_click(&self, click: &Click) -> anyhow::Result<()> {
        self(click)
    }
}

/// Emits a structured log line per recorded click.
pub struct LoggingHook;

#[async_trait]
impl ClickHook for LoggingHook {
    async fn on_click(&self, click: &Click) -> anyhow::Result<()> {
        tracing::info!(
            click_id = click.id,
            domain = click.domain().as_deref().unwrap_or("-"),
            "affiliate click recorded"
        );
        Ok(())
    }
}
