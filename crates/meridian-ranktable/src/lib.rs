//! Meridian rank tables - deterministic rank assignment for placed training jobs.
//!
//! A rank table tells every worker process where it sits in the
//! collective-communication graph. Tables are built per job:
//!
//! - **Accumulate**: each bound pod's devices are cached as a server entry
//! - **Sort**: servers are re-ordered by the rank of their first device
//! - **Serialise**: the sorted list is written out in a versioned schema
//!
//! # Example
//!
//! ```
//! use meridian_ranktable::{Instance, InstanceDevice, PodRef, RankTable, RankTableVersion};
//!
//! let table = RankTable::new(RankTableVersion::V1);
//! let instance = Instance {
//!     pod_name: "worker-0".to_owned(),
//!     server_id: "10.0.0.1".to_owned(),
//!     devices: vec![InstanceDevice { device_id: "0".to_owned(), device_ip: "192.168.0.1".to_owned() }],
//! };
//! table.cache_pod_info(&PodRef::new("default", "worker-0", "uid-0"), &instance, "0")?;
//! assert_eq!(table.document().server_count, "1");
//! # Ok::<(), meridian_ranktable::RankTableError>(())
//! ```

pub mod chip;
pub mod error;
pub mod keys;
pub mod model;
pub mod registry;
pub mod store;
pub mod superpod;
pub mod table;
pub mod version;

pub use chip::{ChipType, MAX_CHIPS_PER_SERVER};
pub use error::{RankTableError, Result};
pub use model::{Device, Instance, InstanceDevice, PodRef, PodUid, Server, SuperPod, SuperPodServer};
pub use registry::{JobUid, RankTableRegistry};
pub use store::{sort_by_rank, ServerStore};
pub use superpod::{gather_super_pods, SuperPodGrouping};
pub use table::{RankTable, MAX_RANK_INDEX};
pub use version::{RankTableDocument, RankTableStatus, RankTableVersion};
