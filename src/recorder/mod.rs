//! Deduplicating click recorder
//!
//! A click is recorded at most once per client and destination within the
//! dedup window. Recording is a best-effort side channel: every failure is
//! logged and swallowed so the redirect always proceeds.

pub mod dedup;
pub mod hook;

pub use dedup::{DedupCache, DedupError, MokaDedupCache};
pub use hook::{ClickHook, LoggingHook};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::TrackerConfig;
use crate::models::{Click, Metadata, NewClick};
use crate::storage::{ClickStore, StorageError};

/// Namespace prefix of dedup cache keys
pub const DEDUP_SCOPE: &str = "affiliate_tracker";

/// Request details stored alongside a click.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("dedup check failed: {0}")]
    Dedup(#[from] DedupError),
    #[error("click store failed: {0}")]
    Storage(#[from] StorageError),
    #[error("post-click hook failed: {0}")]
    Hook(anyhow::Error),
}

pub struct ClickRecorder {
    store: Arc<dyn ClickStore>,
    cache: Arc<dyn DedupCache>,
    hook: Option<Arc<dyn ClickHook>>,
    dedup_window: Duration,
    max_field_len: usize,
    timeout: Duration,
}

impl ClickRecorder {
    pub fn new(
        store: Arc<dyn ClickStore>,
        cache: Arc<dyn DedupCache>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            store,
            cache,
            hook: None,
            dedup_window: config.dedup_window,
            max_field_len: config.max_field_len,
            timeout: config.collaborator_timeout,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ClickHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Record a click unless the same client clicked the same destination
    /// within the dedup window.
    ///
    /// Returns `true` only when the click was persisted and the hook (if any)
    /// succeeded. Never fails.
    pub async fn record(
        &self,
        destination_url: &str,
        metadata: &Metadata,
        client_addr: &str,
        request: &RequestMetadata,
    ) -> bool {
        match self.try_record(destination_url, metadata, client_addr, request).await {
            Ok(Some(click)) => {
                debug!(click_id = click.id, "click recorded");
                true
            }
            Ok(None) => {
                debug!("duplicate click within dedup window, skipping");
                false
            }
            Err(err) => {
                error!(error = %err, "failed to record click");
                false
            }
        }
    }

    async fn try_record(
        &self,
        destination_url: &str,
        metadata: &Metadata,
        client_addr: &str,
        request: &RequestMetadata,
    ) -> Result<Option<Click>, RecordingError> {
        let key = dedup_key(client_addr, destination_url);

        let marker = self.cache.set_if_absent(&key, self.dedup_window);
        let first = tokio::time::timeout(self.timeout, marker)
            .await
            .map_err(|_| DedupError::Timeout)??;
        if !first {
            return Ok(None);
        }

        let new_click = NewClick {
            destination_url: destination_url.to_string(),
            ip_address: anonymize_client(client_addr),
            user_agent: request
                .user_agent
                .as_deref()
                .map(|ua| truncate_chars(ua, self.max_field_len)),
            referer: request
                .referer
                .as_deref()
                .map(|r| truncate_chars(r, self.max_field_len)),
            metadata: metadata.clone(),
            clicked_at: chrono::Utc::now().timestamp(),
        };

        let click = tokio::time::timeout(self.timeout, self.store.create(&new_click))
            .await
            .map_err(|_| StorageError::Timeout)??;

        if let Some(hook) = &self.hook {
            match tokio::time::timeout(self.timeout, hook.on_click(&click)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(RecordingError::Hook(err)),
                Err(_) => {
                    return Err(RecordingError::Hook(anyhow::anyhow!("hook timed out")));
                }
            }
        }

        Ok(Some(click))
    }
}

/// Cache key for a client and destination. Uses the raw client address.
pub fn dedup_key(client_addr: &str, destination_url: &str) -> String {
    format!("{DEDUP_SCOPE}:{client_addr}:{destination_url}")
}

/// Zero the last segment of a dotted-quad address. Other formats are kept
/// as they are; an empty address is stored as `None`.
pub fn anonymize_client(client_addr: &str) -> Option<String> {
    if client_addr.trim().is_empty() {
        return None;
    }

    let parts: Vec<&str> = client_addr.split('.').collect();
    if parts.len() != 4 {
        return Some(client_addr.to_string());
    }

    Some(format!("{}.{}.{}.0", parts[0], parts[1], parts[2]))
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}
