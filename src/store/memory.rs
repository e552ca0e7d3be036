//! In-memory implementation of [`StateStore`].
//!
//! All state is lost on restart; used by tests and ephemeral deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{CrawlState, PrLocator, PrRecord, StateStore, StoreError};

pub struct InMemoryStore {
    records: RwLock<HashMap<PrLocator, PrRecord>>,
    crawl: RwLock<CrawlState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            crawl: RwLock::new(CrawlState::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn get_record(&self, locator: &PrLocator) -> Result<Option<PrRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(locator).cloned())
    }

    async fn put_record(&self, record: PrRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.insert(record.locator(), record);
        Ok(())
    }

    async fn all_records(&self) -> Result<Vec<PrRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }

    async fn crawl_state(&self) -> Result<CrawlState, StoreError> {
        Ok(self.crawl.read().await.clone())
    }

    async fn set_crawl_running(&self, running: bool) -> Result<(), StoreError> {
        self.crawl.write().await.running = running;
        Ok(())
    }

    async fn finish_crawl(&self, finished_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut crawl = self.crawl.write().await;
        crawl.running = false;
        crawl.last_run = Some(finished_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::PrLifecycle;
    use crate::reviewer::VerdictKind;
    use crate::store::ReviewAnnotation;

    fn record(number: u64, state: PrLifecycle) -> PrRecord {
        PrRecord {
            owner: "codius".to_string(),
            repo: "foo".to_string(),
            number,
            state,
            updated_at: Utc::now(),
            annotations: vec![ReviewAnnotation {
                processor: "approval".to_string(),
                classification: VerdictKind::Pass,
                note: Some("2 of 2 required approvals".to_string()),
            }],
        }
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing() {
        let store = InMemoryStore::new();
        let result = store
            .get_record(&PrLocator::new("codius", "foo", 1))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let store = InMemoryStore::new();
        store.put_record(record(42, PrLifecycle::Open)).await.unwrap();

        let got = store
            .get_record(&PrLocator::new("codius", "foo", 42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.state, PrLifecycle::Open);
        assert_eq!(got.annotations.len(), 1);
    }

    #[tokio::test]
    async fn test_put_replaces_whole_record() {
        let store = InMemoryStore::new();
        store.put_record(record(42, PrLifecycle::Open)).await.unwrap();

        let mut updated = record(42, PrLifecycle::Merged);
        updated.annotations.clear();
        store.put_record(updated).await.unwrap();

        let got = store
            .get_record(&PrLocator::new("codius", "foo", 42))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.state, PrLifecycle::Merged);
        assert!(got.annotations.is_empty());
    }

    #[tokio::test]
    async fn test_all_records() {
        let store = InMemoryStore::new();
        store.put_record(record(1, PrLifecycle::Open)).await.unwrap();
        store.put_record(record(2, PrLifecycle::Closed)).await.unwrap();

        let all = store.all_records().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_crawl_state_transitions() {
        let store = InMemoryStore::new();

        let initial = store.crawl_state().await.unwrap();
        assert!(!initial.running);
        assert!(initial.last_run.is_none());

        store.set_crawl_running(true).await.unwrap();
        assert!(store.crawl_state().await.unwrap().running);

        let finished = Utc::now();
        store.finish_crawl(finished).await.unwrap();
        let after = store.crawl_state().await.unwrap();
        assert!(!after.running);
        assert_eq!(after.last_run, Some(finished));
    }
}
