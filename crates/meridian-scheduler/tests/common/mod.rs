//! Common test utilities for scheduler integration tests.

pub mod fixtures;

use meridian_ranktable::RankTableRegistry;
use meridian_scheduler::{
    InMemoryRankTableStore, PlacementEngine, PolicyRegistry, RankTableStore, SchedulerConfig,
};
use std::sync::Arc;

/// Complete test scheduler setup with all components wired together.
pub struct TestScheduler {
    pub policies: Arc<PolicyRegistry>,
    pub tables: Arc<RankTableRegistry>,
    pub engine: PlacementEngine,
    pub store: Arc<dyn RankTableStore>,
}

impl TestScheduler {
    /// Creates a new test scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(&SchedulerConfig::default())
    }

    /// Creates a new test scheduler with custom configuration.
    pub fn with_config(config: &SchedulerConfig) -> Self {
        let policies = Arc::new(
            PolicyRegistry::from_config(&config.placement).expect("default policies are valid"),
        );
        let tables = Arc::new(RankTableRegistry::new());
        let engine = PlacementEngine::new(policies.clone(), tables.clone(), config);
        let store: Arc<dyn RankTableStore> = Arc::new(InMemoryRankTableStore::new());

        Self {
            policies,
            tables,
            engine,
            store,
        }
    }
}

impl Default for TestScheduler {
    fn default() -> Self {
        Self::new()
    }
}
