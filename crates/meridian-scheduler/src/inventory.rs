//! Inventory model: nodes, chips, jobs and the per-cycle snapshot.

use meridian_ranktable::{keys, ChipType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SchedulerError};
use crate::tor::Tor;
use crate::vnpu::VResource;

/// Set of chip indices on one server, stored as a bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChipSet(u64);

impl ChipSet {
    /// Highest chip index the set can hold, exclusive.
    pub const CAPACITY: u32 = u64::BITS;

    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Inserts a chip, returning false if it was present or out of range.
    pub fn insert(&mut self, chip: u32) -> bool {
        if chip >= Self::CAPACITY || self.contains(chip) {
            return false;
        }
        self.0 |= 1 << chip;
        true
    }

    /// Removes a chip, returning true if it was present.
    pub fn remove(&mut self, chip: u32) -> bool {
        let present = self.contains(chip);
        if present {
            self.0 &= !(1 << chip);
        }
        present
    }

    /// Returns true if the chip is in the set.
    #[must_use]
    pub const fn contains(self, chip: u32) -> bool {
        chip < Self::CAPACITY && self.0 & (1 << chip) != 0
    }

    /// Number of chips in the set.
    #[must_use]
    pub const fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates chips in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u32> {
        (0..Self::CAPACITY).filter(move |chip| self.contains(*chip))
    }
}

impl FromIterator<u32> for ChipSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut set = Self::new();
        for chip in iter {
            set.insert(chip);
        }
        set
    }
}

/// Virtual-chip capacity of one physical chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VChip {
    /// Physical chip index.
    pub chip_id: u32,
    /// AI cores on the chip.
    pub total_aicore: u32,
    /// AI cores not yet carved out.
    pub free_aicore: u32,
    /// Memory not yet carved out, in MB.
    pub free_memory_mb: u64,
    /// Unused pre-partitioned slices, by template name.
    #[serde(default)]
    pub static_slices: Vec<String>,
}

impl VChip {
    /// Creates an unallocated chip of the given family.
    #[must_use]
    pub fn whole(chip_id: u32, chip_type: ChipType) -> Self {
        Self {
            chip_id,
            total_aicore: chip_type.aicore_per_chip(),
            free_aicore: chip_type.aicore_per_chip(),
            free_memory_mb: chip_type.memory_mb_per_chip(),
            static_slices: Vec::new(),
        }
    }

    /// Returns true once any virtual chip has been carved from this chip.
    #[must_use]
    pub const fn is_carved(&self) -> bool {
        self.free_aicore < self.total_aicore
    }
}

/// Accelerator node as seen in one scheduling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NpuNode {
    /// Node name.
    pub name: String,
    /// Host address, used as the rank-table server ID.
    pub address: String,
    /// Installed chip family.
    pub chip_type: ChipType,
    /// Installed chip indices in ascending order.
    pub chips: Vec<u32>,
    /// Chips already allocated as whole chips.
    #[serde(default)]
    pub used: ChipSet,
    /// Rack (Tor) the node sits under.
    #[serde(default)]
    pub tor_id: Option<String>,
    /// Super pod the node belongs to.
    #[serde(default)]
    pub super_pod_id: Option<String>,
    /// Device network addresses by chip index.
    #[serde(default)]
    pub device_ips: BTreeMap<u32, String>,
    /// Virtual-chip capacity by chip.
    #[serde(default)]
    pub vchips: Vec<VChip>,
    /// Node labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NpuNode {
    /// Creates a node, rejecting chip lists the chip family cannot hold.
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        chip_type: ChipType,
        chips: impl IntoIterator<Item = u32>,
    ) -> Result<Self> {
        let mut node = Self {
            name: name.into(),
            address: address.into(),
            chip_type,
            chips: chips.into_iter().collect(),
            used: ChipSet::new(),
            tor_id: None,
            super_pod_id: None,
            device_ips: BTreeMap::new(),
            vchips: Vec::new(),
            labels: BTreeMap::new(),
        };
        node.validate()?;
        node.chips.sort_unstable();
        Ok(node)
    }

    /// Checks the chip list against the chip family's limits.
    pub fn validate(&self) -> Result<()> {
        let max = self.chip_type.max_chips();
        if self.chips.len() > max {
            return Err(SchedulerError::InvalidInventory(format!(
                "node {} declares {} chips, {} allows {max}",
                self.name,
                self.chips.len(),
                self.chip_type
            )));
        }
        let mut seen = ChipSet::new();
        for &chip in &self.chips {
            if usize::try_from(chip).map_or(true, |c| c >= max) || !seen.insert(chip) {
                return Err(SchedulerError::InvalidInventory(format!(
                    "node {} has invalid or duplicate chip {chip}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Returns free whole chips in ascending order.
    ///
    /// Chips already hosting virtual chips are not free.
    #[must_use]
    pub fn free_chips(&self) -> Vec<u32> {
        let mut free: Vec<u32> = self
            .chips
            .iter()
            .copied()
            .filter(|chip| self.is_whole_free(*chip))
            .collect();
        free.sort_unstable();
        free
    }

    /// Marks chips as used.
    ///
    /// Fails without changing the node if any chip is missing, used, or carved.
    pub fn reserve(&mut self, chips: &[u32]) -> Result<()> {
        if let Some(chip) = chips
            .iter()
            .find(|chip| !self.chips.contains(chip) || !self.is_whole_free(**chip))
        {
            return Err(SchedulerError::InsufficientChips {
                node: format!("{} (chip {chip})", self.name),
                requested: chips.len(),
            });
        }
        for &chip in chips {
            self.used.insert(chip);
        }
        Ok(())
    }

    fn is_whole_free(&self, chip: u32) -> bool {
        !self.used.contains(chip) && !self.vchip(chip).is_some_and(VChip::is_carved)
    }

    /// Returns the chip's device address, or an empty string if unknown.
    #[must_use]
    pub fn device_ip(&self, chip: u32) -> String {
        self.device_ips.get(&chip).cloned().unwrap_or_default()
    }

    /// Returns the virtual-chip record of a chip.
    #[must_use]
    pub fn vchip(&self, chip: u32) -> Option<&VChip> {
        self.vchips.iter().find(|v| v.chip_id == chip)
    }

    /// Returns the mutable virtual-chip record of a chip.
    pub fn vchip_mut(&mut self, chip: u32) -> Option<&mut VChip> {
        self.vchips.iter_mut().find(|v| v.chip_id == chip)
    }
}

/// Replica group of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSpec {
    /// Number of pods (one per server).
    pub replicas: u32,
    /// Whole chips per pod.
    #[serde(default)]
    pub chips_per_replica: u32,
    /// Virtual-chip request per pod, for sliced jobs.
    #[serde(default)]
    pub vresource: Option<VResource>,
}

/// Training job as admitted by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Unique identifier.
    pub uid: String,
    /// Replica specs by role.
    #[serde(default)]
    pub replicas: BTreeMap<String, ReplicaSpec>,
    /// Job annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Job labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Job {
    /// Returns the schedule-policy annotation.
    #[must_use]
    pub fn policy_name(&self) -> Option<&str> {
        self.annotations.get(keys::SCHEDULE_POLICY).map(String::as_str)
    }

    /// Expands replica specs into tasks, ordered by role then replica index.
    #[must_use]
    pub fn tasks(&self) -> Vec<TaskRequest> {
        self.replicas
            .iter()
            .flat_map(|(role, spec)| {
                let role_key = role.to_lowercase();
                (0..spec.replicas).map(move |index| TaskRequest {
                    name: format!("{}-{role_key}-{index}", self.name),
                    uid: format!("{}-{role_key}-{index}", self.uid),
                    role: role.clone(),
                    index,
                    chips: spec.chips_per_replica,
                    vresource: spec.vresource,
                })
            })
            .collect()
    }

    /// Total number of tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.replicas
            .values()
            .map(|spec| usize::try_from(spec.replicas).unwrap_or(usize::MAX))
            .fold(0, usize::saturating_add)
    }

    /// Returns true if any role requests a virtual chip.
    #[must_use]
    pub fn uses_vnpu(&self) -> bool {
        self.replicas.values().any(|spec| spec.vresource.is_some())
    }

    /// Returns true if the job asks for rack (Tor) affinity.
    #[must_use]
    pub fn is_tor_affine(&self) -> bool {
        self.labels
            .get(keys::TOR_AFFINITY)
            .is_some_and(|v| v != keys::TOR_AFFINITY_NONE)
    }
}

/// One pod's placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// Pod name.
    pub name: String,
    /// Pod UID.
    pub uid: String,
    /// Replica role.
    pub role: String,
    /// Index within the role.
    pub index: u32,
    /// Whole chips requested.
    pub chips: u32,
    /// Virtual-chip request, if sliced.
    pub vresource: Option<VResource>,
}

/// Inventory for one scheduling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    /// Accelerator nodes.
    pub nodes: Vec<NpuNode>,
    /// Rack (Tor) layout.
    #[serde(default)]
    pub tors: Vec<Tor>,
    /// Jobs waiting for placement.
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl InventorySnapshot {
    /// Parses and validates a snapshot from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut snapshot: Self =
            serde_json::from_str(json).map_err(|e| SchedulerError::Serialisation(e.to_string()))?;
        snapshot.validate()?;
        for node in &mut snapshot.nodes {
            node.chips.sort_unstable();
        }
        Ok(snapshot)
    }

    /// Validates every node and rejects duplicate node names.
    pub fn validate(&self) -> Result<()> {
        let mut names = std::collections::BTreeSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !names.insert(node.name.as_str()) {
                return Err(SchedulerError::InvalidInventory(format!(
                    "duplicate node {}",
                    node.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a node by name.
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NpuNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Looks up a node by name for mutation.
    pub fn node_mut(&mut self, name: &str) -> Result<&mut NpuNode> {
        self.nodes
            .iter_mut()
            .find(|n| n.name == name)
            .ok_or_else(|| SchedulerError::NodeNotFound(name.to_owned()))
    }
}
