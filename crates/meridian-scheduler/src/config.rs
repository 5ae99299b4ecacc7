//! Configuration types for the scheduler.

use meridian_ranktable::{ChipType, MAX_RANK_INDEX};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::policy::TopologyClass;
use crate::vnpu::{VTemplate, VnpuMode};

/// Scheduler configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Policy configuration.
    pub placement: PlacementConfig,
    /// Rack (Tor) affinity configuration.
    pub tor: TorConfig,
    /// Virtual-chip configuration.
    pub vnpu: VnpuConfig,
    /// Rank-table configuration.
    pub ranktable: RankTableConfig,
    /// Inventory snapshot source.
    pub snapshot: SnapshotConfig,
}

/// Policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Schedule policies the registry serves.
    pub enabled_policies: Vec<String>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            enabled_policies: TopologyClass::ALL
                .iter()
                .map(|class| class.policy_name().to_owned())
                .collect(),
        }
    }
}

/// Rack (Tor) affinity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// Whether Tor-affine jobs are grouped by rack.
    pub enabled: bool,
    /// Network slices per Tor.
    pub slice_num: usize,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slice_num: 4,
        }
    }
}

/// Virtual-chip configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VnpuConfig {
    /// Slicing strategy.
    pub mode: VnpuMode,
    /// Template overrides per chip family.
    pub templates: BTreeMap<ChipType, Vec<VTemplate>>,
}

/// Rank-table configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankTableConfig {
    /// Largest accepted pod rank index (inclusive).
    pub max_rank_index: i64,
}

impl Default for RankTableConfig {
    fn default() -> Self {
        Self {
            max_rank_index: MAX_RANK_INDEX,
        }
    }
}

/// Inventory snapshot source.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Path to the snapshot JSON file.
    pub path: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("snapshot.json"),
        }
    }
}
