//! Concurrent server store backing a rank table.
//!
//! A single lock guards both the server vector and its pod index, so insert,
//! remove-by-pod and snapshot are each atomic. Readers copy under the read lock
//! and sort afterwards, so the lock is never held across a sort.

use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::model::{PodUid, Server};

#[derive(Debug, Default)]
struct Slots {
    servers: Vec<Server>,
    index: HashMap<PodUid, usize>,
}

/// Thread-safe server container keyed by pod UID.
#[derive(Debug, Default)]
pub struct ServerStore {
    inner: RwLock<Slots>,
}

impl ServerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a server, replacing any entry owned by the same pod.
    ///
    /// Returns the replaced entry.
    pub fn insert(&self, server: Server) -> Option<Server> {
        let mut guard = self.inner.write();
        let slots = &mut *guard;
        if let Some(idx) = slots.index.get(&server.pod_id).copied() {
            return Some(std::mem::replace(&mut slots.servers[idx], server));
        }
        let idx = slots.servers.len();
        slots.index.insert(server.pod_id.clone(), idx);
        slots.servers.push(server);
        None
    }

    /// Removes the pod's server by swapping the last entry into its slot.
    ///
    /// Does not preserve insertion order; read through [`Self::sorted_snapshot`].
    pub fn remove(&self, pod_id: &str) -> Option<Server> {
        let mut guard = self.inner.write();
        let slots = &mut *guard;
        let idx = slots.index.remove(pod_id)?;
        let removed = slots.servers.swap_remove(idx);
        if let Some(moved) = slots.servers.get(idx) {
            slots.index.insert(moved.pod_id.clone(), idx);
        }
        Some(removed)
    }

    /// Returns true if the pod has a server entry.
    pub fn contains(&self, pod_id: &str) -> bool {
        self.inner.read().index.contains_key(pod_id)
    }

    /// Returns the number of servers.
    pub fn len(&self) -> usize {
        self.inner.read().servers.len()
    }

    /// Returns true if no servers are stored.
    pub fn is_empty(&self) -> bool {
        self.inner.read().servers.is_empty()
    }

    /// Copies the servers in storage order.
    pub fn snapshot(&self) -> Vec<Server> {
        self.inner.read().servers.clone()
    }

    /// Copies the servers and sorts them by rank.
    pub fn sorted_snapshot(&self) -> Vec<Server> {
        let mut servers = self.snapshot();
        sort_by_rank(&mut servers);
        servers
    }
}

/// Sorts servers ascending by the rank of their first device.
///
/// Servers whose rank does not parse sort after all others, ordered by server ID.
pub fn sort_by_rank(servers: &mut [Server]) {
    servers.sort_by(rank_order);
}

fn rank_order(a: &Server, b: &Server) -> Ordering {
    match (a.first_rank(), b.first_rank()) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.server_id.cmp(&b.server_id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.server_id.cmp(&b.server_id),
    }
}
