//! Intra-server affinity scoring.
//!
//! Every topology class owns a square matrix of chip-pair distances. Chips on
//! the same interconnect module are cheap to pair; chips on different modules
//! cost an extra module's worth, capped at the incompatible sentinel. A node's
//! score for a request is the cheapest window of consecutive free chips.

use std::cmp::Ordering;

use crate::inventory::NpuNode;

/// Score of a node that cannot hold the request.
pub const UNSCHEDULABLE_SCORE: u32 = u32::MAX;

/// Pairwise chip distance table for one topology class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffinityMatrix {
    module_size: usize,
    entries: Vec<Vec<u32>>,
}

impl AffinityMatrix {
    /// Builds the matrix for servers with `server_slots` chips grouped in
    /// modules of `module_size`.
    #[must_use]
    pub fn new(server_slots: usize, module_size: usize) -> Self {
        let module_size = module_size.max(1);
        let incompatible = to_score(server_slots);
        let entries = (0..server_slots)
            .map(|i| {
                (0..server_slots)
                    .map(|j| {
                        let distance = to_score(i.abs_diff(j));
                        if i / module_size == j / module_size {
                            distance
                        } else {
                            distance.saturating_add(to_score(module_size)).min(incompatible)
                        }
                    })
                    .collect()
            })
            .collect();
        Self {
            module_size,
            entries,
        }
    }

    /// Side length of the matrix.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Chips per interconnect module.
    #[must_use]
    pub const fn module_size(&self) -> usize {
        self.module_size
    }

    /// Sentinel distance between chips that should never pair.
    #[must_use]
    pub fn incompatible(&self) -> u32 {
        to_score(self.size())
    }

    /// Distance between two chips, if both are on the matrix.
    #[must_use]
    pub fn get(&self, i: u32, j: u32) -> Option<u32> {
        let row = self.entries.get(usize::try_from(i).ok()?)?;
        row.get(usize::try_from(j).ok()?).copied()
    }

    /// Sum of pairwise distances within a chip subset.
    #[must_use]
    pub fn subset_score(&self, chips: &[u32]) -> Option<u32> {
        let mut total = 0u32;
        for (n, &a) in chips.iter().enumerate() {
            for &b in &chips[n + 1..] {
                total = total.saturating_add(self.get(a, b)?);
            }
        }
        Some(total)
    }

    /// Picks the cheapest window of `request` consecutive free chips.
    ///
    /// `free` must be ascending. Returns `None` when fewer than `request`
    /// usable chips are free or the request is zero.
    #[must_use]
    pub fn score(&self, free: &[u32], request: usize) -> Option<ChipChoice> {
        let usable: Vec<u32> = free
            .iter()
            .copied()
            .filter(|chip| usize::try_from(*chip).is_ok_and(|c| c < self.size()))
            .collect();
        if request == 0 || usable.len() < request {
            return None;
        }

        let mut best: Option<ChipChoice> = None;
        for window in usable.windows(request) {
            let Some(score) = self.subset_score(window) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| score < b.score) {
                best = Some(ChipChoice {
                    score,
                    chips: window.to_vec(),
                });
            }
        }
        best
    }
}

fn to_score(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(UNSCHEDULABLE_SCORE)
}

/// Chips chosen on one node and their combined distance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipChoice {
    /// Sum of pairwise distances.
    pub score: u32,
    /// Chosen chips, ascending.
    pub chips: Vec<u32>,
}

/// A node's best chip choice for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeScore {
    /// Node name.
    pub node: String,
    /// Window score, or [`UNSCHEDULABLE_SCORE`].
    pub score: u32,
    /// Chosen chips; empty when unschedulable.
    pub chips: Vec<u32>,
}

impl NodeScore {
    /// Returns true if the node can hold the request.
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        self.score != UNSCHEDULABLE_SCORE
    }
}

/// Scores one node for a request of `request` whole chips.
#[must_use]
pub fn score_node(matrix: &AffinityMatrix, node: &NpuNode, request: usize) -> NodeScore {
    match matrix.score(&node.free_chips(), request) {
        Some(choice) => NodeScore {
            node: node.name.clone(),
            score: choice.score,
            chips: choice.chips,
        },
        None => NodeScore {
            node: node.name.clone(),
            score: UNSCHEDULABLE_SCORE,
            chips: Vec::new(),
        },
    }
}

/// Scores candidates and orders them by `(score, name)`, dropping nodes that
/// cannot hold the request.
#[must_use]
pub fn rank_nodes<'a>(
    matrix: &AffinityMatrix,
    nodes: impl IntoIterator<Item = &'a NpuNode>,
    request: usize,
) -> Vec<NodeScore> {
    let mut scores: Vec<NodeScore> = nodes
        .into_iter()
        .map(|node| score_node(matrix, node, request))
        .filter(NodeScore::is_schedulable)
        .collect();
    scores.sort_by(|a, b| match a.score.cmp(&b.score) {
        Ordering::Equal => a.node.cmp(&b.node),
        other => other,
    });
    scores
}
