use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup cache timed out")]
    Timeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Presence markers with a time-to-live.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Mark `key` as present for `ttl` if it is not already.
    ///
    /// Returns `true` when the key was absent. The check and the write are a
    /// single atomic step: of several concurrent callers with the same key,
    /// exactly one sees `true`.
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, DedupError>;
}

/// Each entry expires after the TTL it was inserted with.
struct InsertedTtl;

impl Expiry<String, Duration> for InsertedTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        ttl: &Duration,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(*ttl)
    }
}

/// In-process dedup cache backed by Moka
///
/// Unbounded: markers leave the cache only when their TTL runs out, so the
/// number of live markers is the number of distinct keys seen per window.
pub struct MokaDedupCache {
    markers: Cache<String, Duration>,
}

impl MokaDedupCache {
    pub fn new() -> Self {
        let markers = Cache::builder().expire_after(InsertedTtl).build();
        Self { markers }
    }
}

impl Default for MokaDedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupCache for MokaDedupCache {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, DedupError> {
        let entry = self.markers.entry_by_ref(key).or_insert(ttl).await;
        Ok(entry.is_fresh())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const KEY: &str = "affiliate_tracker:192.168.1.1:https://shop.com";

    #[tokio::test]
    async fn test_first_set_wins() {
        let cache = MokaDedupCache::default();
        assert!(cache.set_if_absent(KEY, Duration::from_secs(5)).await.unwrap());
        assert!(!cache.set_if_absent(KEY, Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = MokaDedupCache::default();
        let ttl = Duration::from_secs(5);
        assert!(cache.set_if_absent(KEY, ttl).await.unwrap());
        assert!(cache
            .set_if_absent("affiliate_tracker:192.168.1.2:https://shop.com", ttl)
            .await
            .unwrap());
        assert!(cache
            .set_if_absent("affiliate_tracker:192.168.1.1:https://shop2.com", ttl)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_marker_expires_after_ttl() {
        let cache = MokaDedupCache::default();
        let ttl = Duration::from_millis(100);
        assert!(cache.set_if_absent(KEY, ttl).await.unwrap());
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(cache.set_if_absent(KEY, ttl).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_has_single_winner() {
        let cache = Arc::new(MokaDedupCache::default());
        let mut handles = vec![];

        for _ in 0..32 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.set_if_absent(KEY, Duration::from_secs(5)).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_live_marker_survives_many_other_keys() {
        let cache = MokaDedupCache::new();
        let ttl = Duration::from_secs(60);
        assert!(cache.set_if_absent(KEY, ttl).await.unwrap());

        for round in 0..5 {
            for i in 0..2_000 {
                let other = format!("affiliate_tracker:10.0.{round}.{i}:https://shop.com");
                assert!(cache.set_if_absent(&other, ttl).await.unwrap());
            }
            cache.markers.run_pending_tasks().await;
        }

        assert!(!cache.set_if_absent(KEY, ttl).await.unwrap());
    }
}
