use crate::models::{Click, NewClick};
use crate::storage::{ClickStore, ClickSummary, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

/// Process-local click store
#[derive(Default)]
pub struct MemoryClickStore {
    clicks: DashMap<i64, Click>,
    next_id: AtomicI64,
}

impl MemoryClickStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clicks.is_empty()
    }

    /// Stored clicks ordered by id
    pub fn clicks(&self) -> Vec<Click> {
        let mut clicks: Vec<Click> = self.clicks.iter().map(|e| e.value().clone()).collect();
        clicks.sort_by_key(|c| c.id);
        clicks
    }
}

#[async_trait]
impl ClickStore for MemoryClickStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, click: &NewClick) -> StorageResult<Click> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = click.clone().into_click(id);
        self.clicks.insert(id, stored.clone());
        Ok(stored)
    }

    async fn summary(&self, since: i64) -> Result<ClickSummary> {
        let mut destinations = HashSet::new();
        let mut summary = ClickSummary::default();

        for entry in self.clicks.iter() {
            let click = entry.value();
            summary.total += 1;
            if click.clicked_at >= since {
                summary.since += 1;
            }
            destinations.insert(click.destination_url.clone());
        }
        summary.unique_destinations = destinations.len() as i64;

        Ok(summary)
    }
}
