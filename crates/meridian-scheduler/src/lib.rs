//! Meridian scheduler - topology-aware placement of accelerator jobs.
//!
//! The scheduler is responsible for:
//!
//! - **Policy dispatch**: Mapping a job's schedule policy to a topology class
//! - **Affinity scoring**: Choosing the cheapest chip window on each node
//! - **Rack grouping**: Laying multi-node jobs out across Tors and slices
//! - **Virtual chips**: Granting fractions of a chip from static or dynamic slices
//! - **Rank tables**: Assigning collective ranks once every task is bound
//!
//! # Architecture
//!
//! Placement is synchronous and works on a copy of the inventory snapshot, so
//! a job either binds completely or leaves the fleet untouched. Finished rank
//! tables are handed to an async [`RankTableStore`] for publication.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use meridian_ranktable::{keys, ChipType, RankTableRegistry};
//! use meridian_scheduler::{
//!     InventorySnapshot, Job, NpuNode, PlacementEngine, PolicyRegistry, ReplicaSpec,
//!     SchedulerConfig,
//! };
//!
//! let mut snapshot = InventorySnapshot {
//!     nodes: vec![NpuNode::new("node-0", "10.0.0.1", ChipType::TrainX8, 0..8)?],
//!     ..InventorySnapshot::default()
//! };
//! let job = Job {
//!     namespace: "default".to_owned(),
//!     name: "train".to_owned(),
//!     uid: "uid-train".to_owned(),
//!     replicas: BTreeMap::from([(
//!         "Worker".to_owned(),
//!         ReplicaSpec { replicas: 1, chips_per_replica: 8, vresource: None },
//!     )]),
//!     annotations: BTreeMap::from([(keys::SCHEDULE_POLICY.to_owned(), "chip8-node8".to_owned())]),
//!     labels: BTreeMap::new(),
//! };
//!
//! let engine = PlacementEngine::new(
//!     Arc::new(PolicyRegistry::with_all()),
//!     Arc::new(RankTableRegistry::new()),
//!     &SchedulerConfig::default(),
//! );
//! let placement = engine.bind_job(&job, &mut snapshot)?;
//! let table = engine.assemble_rank_table(&job, &placement, &snapshot)?;
//! assert_eq!(table.document().server_count, "1");
//! # Ok::<(), meridian_scheduler::SchedulerError>(())
//! ```

pub mod affinity;
pub mod config;
pub mod error;
pub mod inventory;
pub mod placement;
pub mod policy;
pub mod store;
pub mod tor;
pub mod vnpu;

// Re-export main types
pub use affinity::{rank_nodes, score_node, AffinityMatrix, ChipChoice, NodeScore, UNSCHEDULABLE_SCORE};
pub use config::{PlacementConfig, RankTableConfig, SchedulerConfig, SnapshotConfig, TorConfig, VnpuConfig};
pub use error::{ErrorKind, Result, SchedulerError};
pub use inventory::{ChipSet, InventorySnapshot, Job, NpuNode, ReplicaSpec, TaskRequest, VChip};
pub use placement::{Placement, PlacementEngine, TaskBinding};
pub use policy::{PolicyHandler, PolicyRegistry, TopologyClass};
pub use store::{InMemoryRankTableStore, RankTableChange, RankTableStore};
pub use tor::{
    select_job_servers, task_row_and_column, LogicTorSelection, Tor, TorGrouper, TorList, TorServer,
    MAX_SLICE_NUM,
};
pub use vnpu::{
    new_strategy, DynamicVnpu, ScoreMap, StaticVnpu, VResource, VTemplate, VTemplateCatalogue,
    VnpuAllocation, VnpuMode, VnpuStrategy,
};
