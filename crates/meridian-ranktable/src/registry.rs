//! Per-job rank-table registry.

use dashmap::DashMap;
use std::sync::Arc;

use crate::table::RankTable;

/// Unique job identifier.
pub type JobUid = String;

/// Thread-safe map from job UID to that job's rank table.
///
/// Every job owns its table, so one job's failures never reach another's.
#[derive(Debug, Default)]
pub struct RankTableRegistry {
    tables: DashMap<JobUid, Arc<RankTable>>,
}

impl RankTableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
        }
    }

    /// Returns the job's table, creating it with `init` on first use.
    pub fn get_or_create(&self, job_uid: &str, init: impl FnOnce() -> RankTable) -> Arc<RankTable> {
        self.tables
            .entry(job_uid.to_owned())
            .or_insert_with(|| Arc::new(init()))
            .clone()
    }

    /// Gets a job's table.
    pub fn get(&self, job_uid: &str) -> Option<Arc<RankTable>> {
        self.tables.get(job_uid).map(|r| Arc::clone(r.value()))
    }

    /// Drops a job's table.
    pub fn remove(&self, job_uid: &str) -> Option<Arc<RankTable>> {
        self.tables.remove(job_uid).map(|(_, table)| table)
    }

    /// Returns all job UIDs, sorted.
    pub fn job_ids(&self) -> Vec<JobUid> {
        let mut ids: Vec<JobUid> = self.tables.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Returns the number of tracked jobs.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
