//! Publication store for finished rank tables.

use async_trait::async_trait;
use dashmap::DashMap;
use meridian_ranktable::RankTableDocument;
use tokio::sync::broadcast;

use crate::error::Result;

/// Trait for rank-table publication backends.
#[async_trait]
pub trait RankTableStore: Send + Sync {
    /// Publishes a job's rank table, replacing any earlier one.
    async fn publish(&self, job_uid: &str, document: RankTableDocument) -> Result<()>;

    /// Gets a job's published rank table.
    async fn get(&self, job_uid: &str) -> Result<Option<RankTableDocument>>;

    /// Removes a job's rank table.
    async fn remove(&self, job_uid: &str) -> Result<()>;

    /// Subscribes to rank-table changes.
    fn subscribe(&self) -> broadcast::Receiver<RankTableChange>;
}

/// Rank-table change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RankTableChange {
    /// Table published for a job.
    Published { job_uid: String, version: String },
    /// Table removed for a job.
    Removed { job_uid: String },
}

/// In-memory rank-table store.
#[derive(Debug)]
pub struct InMemoryRankTableStore {
    tables: DashMap<String, RankTableDocument>,
    change_sender: broadcast::Sender<RankTableChange>,
}

impl InMemoryRankTableStore {
    /// Creates a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        let (change_sender, _) = broadcast::channel(1024);
        Self {
            tables: DashMap::new(),
            change_sender,
        }
    }

    /// Number of published tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Default for InMemoryRankTableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RankTableStore for InMemoryRankTableStore {
    async fn publish(&self, job_uid: &str, document: RankTableDocument) -> Result<()> {
        let version = document.version.clone();
        self.tables.insert(job_uid.to_owned(), document);
        let _ = self.change_sender.send(RankTableChange::Published {
            job_uid: job_uid.to_owned(),
            version,
        });
        Ok(())
    }

    async fn get(&self, job_uid: &str) -> Result<Option<RankTableDocument>> {
        Ok(self.tables.get(job_uid).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, job_uid: &str) -> Result<()> {
        if self.tables.remove(job_uid).is_some() {
            let _ = self.change_sender.send(RankTableChange::Removed {
                job_uid: job_uid.to_owned(),
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RankTableChange> {
        self.change_sender.subscribe()
    }
}
