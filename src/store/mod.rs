//! Shared state store for aggregated pull-request records.
//!
//! The [`StateStore`] trait abstracts the durable key/value store that the
//! review pipeline writes and the dashboard reads. Backends must provide
//! atomic single-record upserts; the pipeline relies on that rather than
//! client-side locking.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github::PrLifecycle;
use crate::reviewer::VerdictKind;

/// Key of a persisted pull-request record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrLocator {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PrLocator {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl std::fmt::Display for PrLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// One processor's contribution to a persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewAnnotation {
    pub processor: String,
    pub classification: VerdictKind,
    pub note: Option<String>,
}

/// Aggregated per-PR record: lifecycle state plus reviewer annotations.
///
/// Created on the first successful job execution for a PR, replaced
/// wholesale on every subsequent success, never deleted automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrRecord {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub state: PrLifecycle,
    pub updated_at: DateTime<Utc>,
    pub annotations: Vec<ReviewAnnotation>,
}

impl PrRecord {
    pub fn locator(&self) -> PrLocator {
        PrLocator::new(self.owner.clone(), self.repo.clone(), self.number)
    }
}

/// Singleton crawl metadata, read by the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlState {
    pub last_run: Option<DateTime<Utc>>,
    pub running: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure during {operation}: {message}")]
    Backend { operation: String, message: String },

    #[error("corrupt record for {key}: {message}")]
    Corrupt { key: String, message: String },
}

impl StoreError {
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Store operations used by the pipeline, the crawl, and the dashboard.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_record(&self, locator: &PrLocator) -> Result<Option<PrRecord>, StoreError>;

    /// Upsert a record. All fields land together; readers never observe a
    /// record with `state` unset.
    async fn put_record(&self, record: PrRecord) -> Result<(), StoreError>;

    /// Every known record, in no particular order.
    async fn all_records(&self) -> Result<Vec<PrRecord>, StoreError>;

    async fn crawl_state(&self) -> Result<CrawlState, StoreError>;

    async fn set_crawl_running(&self, running: bool) -> Result<(), StoreError>;

    /// Clear the running flag and stamp `last_run` in one step.
    async fn finish_crawl(&self, finished_at: DateTime<Utc>) -> Result<(), StoreError>;
}
