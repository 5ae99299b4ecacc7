//! Rank-table records: servers, devices, super pods and the pod inputs they come from.

use serde::{Deserialize, Serialize};

/// Unique pod identifier.
pub type PodUid = String;

/// One accelerator device and its communication rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Physical device identifier on the server.
    pub device_id: String,
    /// Device network address.
    pub device_ip: String,
    /// Globally unique rank, as a decimal string.
    pub rank_id: String,
    /// Position of the device within its server.
    #[serde(skip)]
    pub local_id: u32,
}

/// One bound pod's server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server (host) identifier.
    pub server_id: String,
    /// Pod that owns this entry.
    #[serde(skip)]
    pub pod_id: PodUid,
    /// Devices in rank order.
    #[serde(rename = "device")]
    pub device_list: Vec<Device>,
    /// Super-pod rank recorded for the pod, if any.
    #[serde(skip)]
    pub super_pod_rank: Option<String>,
}

impl Server {
    /// Parses the rank of the first device.
    ///
    /// Returns `None` when the server has no devices or the rank is not numeric.
    #[must_use]
    pub fn first_rank(&self) -> Option<i64> {
        self.device_list.first()?.rank_id.parse().ok()
    }
}

/// Super-pod group in a v1.2 rank table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperPod {
    /// Super-pod identifier.
    pub super_pod_id: String,
    /// Member servers in rank order.
    pub server_list: Vec<SuperPodServer>,
}

/// Server reference inside a super-pod group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperPodServer {
    /// Server identifier.
    pub server_id: String,
}

/// Device annotation payload recorded on a bound pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Pod name.
    pub pod_name: String,
    /// Server hosting the pod.
    pub server_id: String,
    /// Devices allocated to the pod.
    pub devices: Vec<InstanceDevice>,
}

/// Device entry of an [`Instance`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDevice {
    /// Physical device identifier.
    pub device_id: String,
    /// Device network address.
    pub device_ip: String,
}

/// Identity of a bound pod.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodRef {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Pod UID.
    pub uid: PodUid,
    /// Super-pod rank annotated on the pod.
    pub super_pod_rank: Option<String>,
}

impl PodRef {
    /// Creates a pod reference without a super-pod rank.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: uid.into(),
            super_pod_rank: None,
        }
    }

    /// Sets the super-pod rank.
    #[must_use]
    pub fn with_super_pod_rank(mut self, rank: impl Into<String>) -> Self {
        self.super_pod_rank = Some(rank.into());
        self
    }
}
