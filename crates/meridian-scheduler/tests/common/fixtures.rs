//! Test fixtures for scheduler integration tests.

use meridian_ranktable::{keys, ChipType};
use meridian_scheduler::{Job, NpuNode, ReplicaSpec, Tor, TorServer, VChip, VResource};
use std::collections::BTreeMap;

/// Builder for creating test NpuNode instances.
pub struct NodeBuilder {
    name: String,
    address: String,
    chip_type: ChipType,
    chips: Vec<u32>,
    used: Vec<u32>,
    tor_id: Option<String>,
    super_pod_id: Option<String>,
    static_slices: Vec<(u32, String)>,
    vnpu: bool,
}

impl NodeBuilder {
    /// Creates a new node builder with a full eight-chip server.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            address: format!("host-{name}"),
            chip_type: ChipType::TrainX8,
            chips: (0..8).collect(),
            used: vec![],
            tor_id: None,
            super_pod_id: None,
            static_slices: vec![],
            vnpu: false,
        }
    }

    /// Sets the node's host address.
    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_owned();
        self
    }

    /// Sets the chip family and installs every chip it holds.
    pub fn with_chip_type(mut self, chip_type: ChipType) -> Self {
        self.chip_type = chip_type;
        self.chips = (0..u32::try_from(chip_type.max_chips()).unwrap()).collect();
        self
    }

    /// Sets the installed chips.
    pub fn with_chips(mut self, chips: impl IntoIterator<Item = u32>) -> Self {
        self.chips = chips.into_iter().collect();
        self
    }

    /// Marks chips as already allocated.
    pub fn with_used(mut self, used: &[u32]) -> Self {
        self.used = used.to_vec();
        self
    }

    /// Sets the node's Tor.
    pub fn with_tor(mut self, tor_id: &str) -> Self {
        self.tor_id = Some(tor_id.to_owned());
        self
    }

    /// Sets the node's super pod.
    pub fn with_super_pod(mut self, super_pod_id: &str) -> Self {
        self.super_pod_id = Some(super_pod_id.to_owned());
        self
    }

    /// Gives every chip unallocated virtual-chip capacity.
    pub fn with_vnpu(mut self) -> Self {
        self.vnpu = true;
        self
    }

    /// Adds a pre-partitioned slice on a chip.
    pub fn with_static_slice(mut self, chip: u32, template: &str) -> Self {
        self.vnpu = true;
        self.static_slices.push((chip, template.to_owned()));
        self
    }

    /// Builds the NpuNode.
    pub fn build(self) -> NpuNode {
        let mut node =
            NpuNode::new(&self.name, &self.address, self.chip_type, self.chips).unwrap();
        node.reserve(&self.used).unwrap();
        node.tor_id = self.tor_id;
        node.super_pod_id = self.super_pod_id;
        node.device_ips = node
            .chips
            .iter()
            .map(|chip| (*chip, format!("192.168.0.{chip}")))
            .collect();
        if self.vnpu {
            node.vchips = node
                .chips
                .iter()
                .map(|chip| VChip::whole(*chip, self.chip_type))
                .collect();
            for (chip, template) in self.static_slices {
                if let Some(vchip) = node.vchip_mut(chip) {
                    vchip.static_slices.push(template);
                }
            }
        }
        node
    }
}

/// Builder for creating test Job instances.
pub struct JobBuilder {
    name: String,
    uid: String,
    replicas: BTreeMap<String, ReplicaSpec>,
    annotations: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

impl JobBuilder {
    /// Creates a new job builder with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            uid: format!("uid-{name}"),
            replicas: BTreeMap::new(),
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    /// Sets the schedule policy.
    pub fn with_policy(self, policy: &str) -> Self {
        self.with_annotation(keys::SCHEDULE_POLICY, policy)
    }

    /// Adds an annotation.
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Adds a label.
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_owned(), value.to_owned());
        self
    }

    /// Asks for rack (Tor) affinity.
    pub fn tor_affine(self) -> Self {
        self.with_label(keys::TOR_AFFINITY, "large-model-schema")
    }

    /// Adds a whole-chip role.
    pub fn with_workers(mut self, role: &str, replicas: u32, chips: u32) -> Self {
        self.replicas.insert(
            role.to_owned(),
            ReplicaSpec {
                replicas,
                chips_per_replica: chips,
                vresource: None,
            },
        );
        self
    }

    /// Adds a virtual-chip role.
    pub fn with_vnpu_workers(mut self, role: &str, replicas: u32, aicore: u32) -> Self {
        self.replicas.insert(
            role.to_owned(),
            ReplicaSpec {
                replicas,
                chips_per_replica: 0,
                vresource: Some(VResource {
                    aicore,
                    memory_mb: 0,
                }),
            },
        );
        self
    }

    /// Builds the Job.
    pub fn build(self) -> Job {
        Job {
            namespace: "default".to_owned(),
            name: self.name,
            uid: self.uid,
            replicas: self.replicas,
            annotations: self.annotations,
            labels: self.labels,
        }
    }
}

/// Creates `count` identical full nodes named `{prefix}-{i}`.
pub fn create_nodes(prefix: &str, count: usize) -> Vec<NpuNode> {
    (0..count)
        .map(|i| {
            NodeBuilder::new(&format!("{prefix}-{i:02}"))
                .with_address(&format!("10.0.{}.{}", i / 256, i % 256))
                .build()
        })
        .collect()
}

/// Lays out `tor_num` Tors of `slice_num` servers each, with the first
/// `claimed` servers (in Tor then slice order) claimed by `job`.
pub fn claimed_tors(tor_num: usize, slice_num: usize, claimed: usize, job: &str) -> Vec<Tor> {
    let mut taken = 0;
    (0..tor_num)
        .map(|t| Tor {
            id: format!("tor-{t:02}"),
            servers: (0..slice_num)
                .map(|s| {
                    let current_job = (taken < claimed).then(|| job.to_owned());
                    taken += 1;
                    TorServer {
                        name: format!("node-{:02}", t * slice_num + s),
                        slice_id: s,
                        current_job,
                    }
                })
                .collect(),
        })
        .collect()
}
