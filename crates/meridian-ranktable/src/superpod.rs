//! Super-pod grouping for v1.2 rank tables.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

use crate::keys;
use crate::model::{Server, SuperPod, SuperPodServer};

/// How servers are grouped into super pods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuperPodGrouping {
    /// Contiguous runs of equal super-pod rank form one group each.
    Soft,
    /// Servers are grouped by their super-pod rank, or by rank blocks of the
    /// given chip count when ranks are missing.
    Hard {
        /// Chips per super pod from the `sp-block` annotation.
        block: Option<usize>,
    },
}

impl SuperPodGrouping {
    /// Derives the grouping from job annotations and labels.
    #[must_use]
    pub fn for_job(annotations: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> Self {
        if labels.get(keys::SUPER_POD_AFFINITY).map(String::as_str) == Some(keys::SOFT_STRATEGY) {
            return Self::Soft;
        }
        let block = annotations
            .get(keys::SUPER_POD_BLOCK)
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|b| *b > 0);
        Self::Hard { block }
    }
}

impl Default for SuperPodGrouping {
    fn default() -> Self {
        Self::Hard { block: None }
    }
}

/// Groups rank-sorted servers into super pods.
#[must_use]
pub fn gather_super_pods(servers: &[Server], grouping: SuperPodGrouping) -> Vec<SuperPod> {
    if servers.is_empty() {
        return Vec::new();
    }
    match grouping {
        SuperPodGrouping::Soft => gather_contiguous(servers),
        SuperPodGrouping::Hard { .. } if servers.iter().all(|s| s.super_pod_rank.is_some()) => {
            gather_by_rank(servers)
        }
        SuperPodGrouping::Hard { block: Some(block) } => gather_by_block(servers, block),
        SuperPodGrouping::Hard { block: None } => vec![SuperPod {
            super_pod_id: "0".to_owned(),
            server_list: servers.iter().map(member).collect(),
        }],
    }
}

fn member(server: &Server) -> SuperPodServer {
    SuperPodServer {
        server_id: server.server_id.clone(),
    }
}

fn super_pod_rank(server: &Server) -> String {
    server.super_pod_rank.clone().unwrap_or_else(|| "0".to_owned())
}

fn gather_contiguous(servers: &[Server]) -> Vec<SuperPod> {
    let mut groups: Vec<SuperPod> = Vec::new();
    for server in servers {
        let rank = super_pod_rank(server);
        match groups.last_mut() {
            Some(last) if last.super_pod_id == rank => last.server_list.push(member(server)),
            _ => groups.push(SuperPod {
                super_pod_id: rank,
                server_list: vec![member(server)],
            }),
        }
    }
    groups
}

fn gather_by_rank(servers: &[Server]) -> Vec<SuperPod> {
    let mut groups: Vec<SuperPod> = Vec::new();
    for server in servers {
        let rank = super_pod_rank(server);
        match groups.iter_mut().find(|g| g.super_pod_id == rank) {
            Some(group) => group.server_list.push(member(server)),
            None => groups.push(SuperPod {
                super_pod_id: rank,
                server_list: vec![member(server)],
            }),
        }
    }
    groups.sort_by(|a, b| numeric_order(&a.super_pod_id, &b.super_pod_id));
    groups
}

fn gather_by_block(servers: &[Server], block: usize) -> Vec<SuperPod> {
    let mut groups: BTreeMap<i64, Vec<SuperPodServer>> = BTreeMap::new();
    #[allow(clippy::cast_possible_wrap, clippy::as_conversions)]
    let block = block as i64;
    for server in servers {
        let Some(rank) = server.first_rank() else {
            warn!(server_id = %server.server_id, "Server rank not numeric, left out of super pods");
            continue;
        };
        groups.entry(rank / block).or_default().push(member(server));
    }
    groups
        .into_iter()
        .map(|(id, server_list)| SuperPod {
            super_pod_id: id.to_string(),
            server_list,
        })
        .collect()
}

fn numeric_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<i64>(), b.parse::<i64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
