//! Rank-table versions, status and the serialised document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RankTableError, Result};
use crate::keys;
use crate::model::{Server, SuperPod};

/// Rank-table schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankTableVersion {
    /// Flat server/device list.
    V1,
    /// Adds the super-pod list.
    V1Dot2,
    /// Flat list built incrementally as pods bind.
    V2,
}

impl RankTableVersion {
    /// Version tag written into the document.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1.0",
            Self::V1Dot2 => "1.2",
            Self::V2 => "2.0",
        }
    }

    /// Returns true if the version carries a super-pod list.
    #[must_use]
    pub const fn has_super_pods(self) -> bool {
        matches!(self, Self::V1Dot2)
    }

    /// Picks the version from job metadata alone.
    #[must_use]
    pub fn for_job(annotations: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> Self {
        if let Some(policy) = annotations.get(keys::SCHEDULE_POLICY) {
            if policy == keys::SUPER_POD_POLICY {
                return Self::V1Dot2;
            }
            return Self::requested(annotations);
        }
        if annotations.contains_key(keys::SUPER_POD_BLOCK) {
            return Self::V1Dot2;
        }
        if labels.get(keys::ACCELERATOR_TYPE).map(String::as_str) == Some(keys::SUPER_POD_ACCELERATOR) {
            return Self::V1Dot2;
        }
        Self::requested(annotations)
    }

    fn requested(annotations: &BTreeMap<String, String>) -> Self {
        match annotations.get(keys::RANKTABLE_VERSION).map(String::as_str) {
            Some("2.0") => Self::V2,
            _ => Self::V1,
        }
    }
}

impl std::fmt::Display for RankTableVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rank-table construction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankTableStatus {
    /// Pods are still binding.
    #[default]
    Initializing,
    /// Every pod is cached and the table is final.
    Completed,
}

/// Serialised rank table consumed by the training runtime.
///
/// Counts and ranks are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankTableDocument {
    /// Schema version tag.
    pub version: String,
    /// Construction status.
    pub status: RankTableStatus,
    /// Number of servers.
    pub server_count: String,
    /// Servers in rank order.
    pub server_list: Vec<Server>,
    /// Super-pod groups, v1.2 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub super_pod_list: Option<Vec<SuperPod>>,
}

impl RankTableDocument {
    /// Serialises the document to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RankTableError::Serialisation(e.to_string()))
    }

    /// Parses a document from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RankTableError::Serialisation(e.to_string()))
    }

    /// Lists `(server_id, device_id, rank_id)` in document order.
    #[must_use]
    pub fn rank_assignment(&self) -> Vec<(String, String, String)> {
        self.server_list
            .iter()
            .flat_map(|server| {
                server.device_list.iter().map(|device| {
                    (
                        server.server_id.clone(),
                        device.device_id.clone(),
                        device.rank_id.clone(),
                    )
                })
            })
            .collect()
    }
}
