//! Incrementally built rank table for one job.
//!
//! Pods are cached as they bind, removed as they are deleted, and the sorted
//! server list is re-derived on every read that depends on order.

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::chip::MAX_CHIPS_PER_SERVER;
use crate::error::{RankTableError, Result};
use crate::model::{Device, Instance, PodRef, Server};
use crate::store::ServerStore;
use crate::superpod::{gather_super_pods, SuperPodGrouping};
use crate::version::{RankTableDocument, RankTableStatus, RankTableVersion};

/// Largest rank index a pod may carry.
pub const MAX_RANK_INDEX: i64 = 10_000;

/// Rank table of one job.
#[derive(Debug)]
pub struct RankTable {
    version: RankTableVersion,
    grouping: SuperPodGrouping,
    max_devices: usize,
    max_rank_index: i64,
    status: RwLock<RankTableStatus>,
    servers: ServerStore,
}

impl RankTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(version: RankTableVersion) -> Self {
        Self {
            version,
            grouping: SuperPodGrouping::default(),
            max_devices: MAX_CHIPS_PER_SERVER,
            max_rank_index: MAX_RANK_INDEX,
            status: RwLock::new(RankTableStatus::Initializing),
            servers: ServerStore::new(),
        }
    }

    /// Sets the super-pod grouping used by v1.2 documents.
    #[must_use]
    pub const fn with_grouping(mut self, grouping: SuperPodGrouping) -> Self {
        self.grouping = grouping;
        self
    }

    /// Sets the per-server device limit, normally the chip type's maximum.
    #[must_use]
    pub const fn with_max_devices(mut self, max_devices: usize) -> Self {
        self.max_devices = max_devices;
        self
    }

    /// Sets the largest accepted rank index.
    #[must_use]
    pub const fn with_max_rank_index(mut self, max_rank_index: i64) -> Self {
        self.max_rank_index = max_rank_index;
        self
    }

    /// Returns the schema version.
    #[must_use]
    pub const fn version(&self) -> RankTableVersion {
        self.version
    }

    /// Returns the construction status.
    pub fn status(&self) -> RankTableStatus {
        *self.status.read()
    }

    /// Updates the construction status.
    pub fn set_status(&self, status: RankTableStatus) {
        *self.status.write() = status;
    }

    /// Converts a bound pod's devices into a server entry.
    ///
    /// Each device gets `rank_index * device_count + ordinal`, so servers cached at
    /// different times never collide.
    pub fn cache_pod_info(&self, pod: &PodRef, instance: &Instance, rank_index: &str) -> Result<()> {
        let index: i64 = rank_index
            .trim()
            .parse()
            .map_err(|_| RankTableError::InvalidRankIndex(rank_index.to_owned()))?;
        if !(0..=self.max_rank_index).contains(&index) {
            return Err(RankTableError::RankIndexOutOfRange {
                index,
                max: self.max_rank_index,
            });
        }

        let rank_factor = instance.devices.len();
        if rank_factor > self.max_devices {
            return Err(RankTableError::TooManyDevices {
                count: rank_factor,
                max: self.max_devices,
            });
        }
        if rank_factor == 0 {
            return Err(RankTableError::NoDevices {
                namespace: pod.namespace.clone(),
                name: pod.name.clone(),
            });
        }

        #[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
        let base = index * rank_factor as i64;
        let device_list = instance
            .devices
            .iter()
            .zip(0u32..)
            .map(|(device, ordinal)| Device {
                device_id: device.device_id.clone(),
                device_ip: device.device_ip.clone(),
                rank_id: (base + i64::from(ordinal)).to_string(),
                local_id: ordinal,
            })
            .collect();

        let server = Server {
            server_id: instance.server_id.clone(),
            pod_id: pod.uid.clone(),
            device_list,
            super_pod_rank: pod.super_pod_rank.clone(),
        };
        if self.servers.insert(server).is_some() {
            debug!(pod = %pod.uid, "Replaced cached server for pod");
        }
        debug!(
            pod = %pod.uid,
            server_id = %instance.server_id,
            rank_index = index,
            devices = rank_factor,
            "Cached pod info"
        );
        Ok(())
    }

    /// Removes the server owned by a pod.
    ///
    /// Removal swaps the last entry into the freed slot, so storage order changes;
    /// ordered reads go through [`Self::before_update`]. Fails without touching
    /// the table if the pod was never cached.
    pub fn remove_pod_info(&self, namespace: &str, pod_id: &str) -> Result<Server> {
        let removed = self
            .servers
            .remove(pod_id)
            .ok_or_else(|| RankTableError::PodNotFound {
                namespace: namespace.to_owned(),
                pod_id: pod_id.to_owned(),
            })?;
        info!(namespace, pod = pod_id, servers = self.servers.len(), "Removed pod info");
        Ok(removed)
    }

    /// Drops the pod's server if present.
    pub fn delete_pod(&self, pod_id: &str) -> bool {
        self.servers.remove(pod_id).is_some()
    }

    /// Returns a consistent snapshot of the servers sorted by rank.
    pub fn before_update(&self) -> Vec<Server> {
        self.servers.sorted_snapshot()
    }

    /// Returns the number of cached servers.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// Returns the number of devices in the table.
    ///
    /// Assumes every server carries as many devices as the first one.
    pub fn pod_num(&self) -> usize {
        let servers = self.before_update();
        servers
            .first()
            .map_or(0, |first| servers.len() * first.device_list.len())
    }

    /// Builds the serialisable document from a sorted snapshot.
    pub fn document(&self) -> RankTableDocument {
        let server_list = self.before_update();
        let super_pod_list = self
            .version
            .has_super_pods()
            .then(|| gather_super_pods(&server_list, self.grouping));
        RankTableDocument {
            version: self.version.to_string(),
            status: self.status(),
            server_count: server_list.len().to_string(),
            server_list,
            super_pod_list,
        }
    }

    /// Serialises the table to JSON.
    pub fn to_json(&self) -> Result<String> {
        self.document().to_json()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::InstanceDevice;
    use std::sync::Arc;

    fn instance(server_id: &str, devices: usize) -> Instance {
        Instance {
            pod_name: format!("pod-{server_id}"),
            server_id: server_id.to_owned(),
            devices: (0..devices)
                .map(|i| InstanceDevice {
                    device_id: i.to_string(),
                    device_ip: format!("192.168.{server_id}.{i}"),
                })
                .collect(),
        }
    }

    fn pod(uid: &str) -> PodRef {
        PodRef::new("default", format!("worker-{uid}"), uid)
    }

    fn first_ranks(table: &RankTable) -> Vec<String> {
        table
            .before_update()
            .iter()
            .map(|s| s.device_list[0].rank_id.clone())
            .collect()
    }

    #[test]
    fn cache_assigns_rank_from_index() {
        let table = RankTable::new(RankTableVersion::V2);
        table.cache_pod_info(&pod("a"), &instance("1", 4), "2").unwrap();

        let servers = table.before_update();
        let ranks: Vec<&str> = servers[0].device_list.iter().map(|d| d.rank_id.as_str()).collect();
        assert_eq!(ranks, vec!["8", "9", "10", "11"]);
        assert_eq!(servers[0].device_list[3].local_id, 3);
    }

    #[test]
    fn cache_rejects_bad_input() {
        let table = RankTable::new(RankTableVersion::V2).with_max_devices(8);
        assert!(matches!(
            table.cache_pod_info(&pod("a"), &instance("1", 9), "0"),
            Err(RankTableError::TooManyDevices { count: 9, max: 8 })
        ));
        assert!(matches!(
            table.cache_pod_info(&pod("a"), &instance("1", 0), "0"),
            Err(RankTableError::NoDevices { .. })
        ));
        assert!(matches!(
            table.cache_pod_info(&pod("a"), &instance("1", 1), "one"),
            Err(RankTableError::InvalidRankIndex(_))
        ));
        assert!(matches!(
            table.cache_pod_info(&pod("a"), &instance("1", 1), "10001"),
            Err(RankTableError::RankIndexOutOfRange { .. })
        ));
        assert_eq!(table.server_count(), 0);
    }

    #[test]
    fn max_rank_index_is_inclusive() {
        let table = RankTable::new(RankTableVersion::V1).with_max_rank_index(3);
        table.cache_pod_info(&pod("a"), &instance("1", 1), "3").unwrap();
        assert!(matches!(
            table.cache_pod_info(&pod("b"), &instance("2", 1), "4"),
            Err(RankTableError::RankIndexOutOfRange { index: 4, max: 3 })
        ));
        assert!(matches!(
            table.cache_pod_info(&pod("c"), &instance("3", 1), "-1"),
            Err(RankTableError::RankIndexOutOfRange { .. })
        ));
        assert_eq!(table.server_count(), 1);
    }

    #[test]
    fn remove_targets_only_the_pod() {
        let table = RankTable::new(RankTableVersion::V2);
        table.cache_pod_info(&pod("a"), &instance("1", 2), "0").unwrap();
        table.cache_pod_info(&pod("b"), &instance("2", 2), "1").unwrap();
        assert_eq!(table.server_count(), 2);

        let removed = table.remove_pod_info("default", "a").unwrap();
        assert_eq!(removed.server_id, "1");
        assert_eq!(table.server_count(), 1);
        assert_eq!(table.before_update()[0].server_id, "2");
        assert_eq!(table.document().server_count, "1");
    }

    #[test]
    fn remove_absent_pod_fails_and_keeps_servers() {
        let table = RankTable::new(RankTableVersion::V2);
        table.cache_pod_info(&pod("a"), &instance("1", 2), "0").unwrap();
        table.cache_pod_info(&pod("b"), &instance("2", 2), "1").unwrap();

        let err = table.remove_pod_info("default", "ghost").unwrap_err();
        assert!(matches!(err, RankTableError::PodNotFound { .. }));
        assert_eq!(table.server_count(), 2);
    }

    #[test]
    fn before_update_sorts_by_first_rank() {
        let table = RankTable::new(RankTableVersion::V1);
        table.cache_pod_info(&pod("c"), &instance("3", 1), "2").unwrap();
        table.cache_pod_info(&pod("a"), &instance("1", 1), "0").unwrap();
        table.cache_pod_info(&pod("b"), &instance("2", 1), "1").unwrap();
        assert_eq!(first_ranks(&table), vec!["0", "1", "2"]);
    }

    #[test]
    fn pod_num_counts_devices() {
        let table = RankTable::new(RankTableVersion::V1);
        assert_eq!(table.pod_num(), 0);
        table.cache_pod_info(&pod("a"), &instance("1", 2), "0").unwrap();
        table.cache_pod_info(&pod("b"), &instance("2", 2), "1").unwrap();
        assert_eq!(table.pod_num(), 4);
    }

    #[test]
    fn delete_pod_is_idempotent() {
        let table = RankTable::new(RankTableVersion::V1);
        table.cache_pod_info(&pod("a"), &instance("1", 1), "0").unwrap();
        assert!(table.delete_pod("a"));
        assert!(!table.delete_pod("a"));
    }

    #[test]
    fn v1dot2_document_carries_super_pods() {
        let table = RankTable::new(RankTableVersion::V1Dot2)
            .with_grouping(SuperPodGrouping::Hard { block: Some(2) });
        table.cache_pod_info(&pod("a"), &instance("1", 2), "0").unwrap();
        table.cache_pod_info(&pod("b"), &instance("2", 2), "1").unwrap();

        let doc = table.document();
        let super_pods = doc.super_pod_list.unwrap();
        assert_eq!(super_pods.len(), 2);
        assert_eq!(super_pods[0].server_list[0].server_id, "1");
        assert!(RankTable::new(RankTableVersion::V1).document().super_pod_list.is_none());
    }

    #[test]
    fn concurrent_binds_and_removals() {
        let table = Arc::new(RankTable::new(RankTableVersion::V2));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let uid = format!("pod-{i}");
                    table
                        .cache_pod_info(&pod(&uid), &instance(&i.to_string(), 2), &i.to_string())
                        .unwrap();
                    if i % 4 == 0 {
                        table.remove_pod_info("default", &uid).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.server_count(), 12);
        let ranks: Vec<i64> = table
            .before_update()
            .iter()
            .filter_map(Server::first_rank)
            .collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
    }
}
