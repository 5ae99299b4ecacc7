//! Rack (Tor) grouping for multi-node jobs.
//!
//! Servers under a Tor are wired to network slices. A job that spans racks
//! wants its tasks laid out so that task `n` of every rack shares a slice.
//! When physical racks are too fragmented, claimed servers are re-bucketed by
//! slice into logical Tors.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::debug;

use crate::error::{Result, SchedulerError};

/// Largest slice count a Tor can carry.
pub const MAX_SLICE_NUM: usize = 128;

/// Server seat under a Tor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorServer {
    /// Node name.
    pub name: String,
    /// Network slice index.
    pub slice_id: usize,
    /// Job currently claiming the server.
    #[serde(default)]
    pub current_job: Option<String>,
}

impl TorServer {
    /// Returns true if the server is claimed by the job.
    #[must_use]
    pub fn is_claimed_by(&self, job: &str) -> bool {
        self.current_job.as_deref() == Some(job)
    }
}

/// One rack switch and its servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tor {
    /// Tor identifier.
    pub id: String,
    /// Servers in slice order.
    pub servers: Vec<TorServer>,
}

impl Tor {
    /// Number of servers claimed by the job.
    #[must_use]
    pub fn claimed_by(&self, job: &str) -> usize {
        self.servers.iter().filter(|s| s.is_claimed_by(job)).count()
    }

    /// Returns true if every server is claimed by the job.
    #[must_use]
    pub fn is_full_for(&self, job: &str) -> bool {
        !self.servers.is_empty() && self.servers.iter().all(|s| s.is_claimed_by(job))
    }

    fn claimed_only(&self, job: &str) -> Self {
        Self {
            id: self.id.clone(),
            servers: self
                .servers
                .iter()
                .filter(|s| s.is_claimed_by(job))
                .cloned()
                .collect(),
        }
    }
}

/// Logical Tors built from claimed servers, with the number of full ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicTorSelection {
    /// Logical Tors; Tor `k` holds the `k`-th claimed server of each slice.
    pub tors: Vec<Tor>,
    /// Logical Tors with every slice filled.
    pub full_tor_num: usize,
}

/// Every Tor in the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorList {
    tors: Vec<Tor>,
    slice_num: usize,
}

impl TorList {
    /// Creates the list with the configured slice count.
    #[must_use]
    pub fn new(tors: Vec<Tor>, slice_num: usize) -> Self {
        Self { tors, slice_num }
    }

    /// Physical Tors.
    #[must_use]
    pub fn tors(&self) -> &[Tor] {
        &self.tors
    }

    /// Slices per Tor.
    #[must_use]
    pub const fn slice_num(&self) -> usize {
        self.slice_num
    }

    /// Claims unclaimed servers whose node is a candidate.
    ///
    /// Returns the number of servers newly claimed.
    pub fn mark_by_job(&mut self, candidates: &BTreeSet<String>, job: &str) -> usize {
        let mut marked = 0;
        for server in self.tors.iter_mut().flat_map(|t| t.servers.iter_mut()) {
            if server.current_job.is_none() && candidates.contains(&server.name) {
                server.current_job = Some(job.to_owned());
                marked += 1;
            }
        }
        debug!(job, marked, "Tor servers claimed");
        marked
    }

    /// Releases every server claimed by the job.
    pub fn release_job(&mut self, job: &str) {
        for server in self.tors.iter_mut().flat_map(|t| t.servers.iter_mut()) {
            if server.is_claimed_by(job) {
                server.current_job = None;
            }
        }
    }

    /// Drops the job's claims on every server not in `keep`.
    pub fn retain_job(&mut self, job: &str, keep: &BTreeSet<String>) {
        for server in self.tors.iter_mut().flat_map(|t| t.servers.iter_mut()) {
            if server.is_claimed_by(job) && !keep.contains(&server.name) {
                server.current_job = None;
            }
        }
    }

    /// Number of physical Tors fully claimed by the job.
    #[must_use]
    pub fn full_tor_num(&self, job: &str) -> usize {
        self.tors.iter().filter(|t| t.is_full_for(job)).count()
    }

    /// Re-buckets the job's claimed servers by slice into logical Tors.
    ///
    /// Returns `None` when `slice_num` is out of range, `task_column` is not a
    /// slice, or logical Tor `task_row` (and every row before it) cannot hold
    /// slices `0..=task_column`.
    #[must_use]
    pub fn logic_tors_and_full_tor_num(
        &self,
        job: &str,
        task_column: usize,
        task_row: usize,
        slice_num: usize,
    ) -> Option<LogicTorSelection> {
        if slice_num == 0 || slice_num > MAX_SLICE_NUM || task_column >= slice_num {
            return None;
        }

        let mut buckets: Vec<Vec<&TorServer>> = vec![Vec::new(); slice_num];
        for server in self.tors.iter().flat_map(|t| t.servers.iter()) {
            if server.is_claimed_by(job) {
                if let Some(bucket) = buckets.get_mut(server.slice_id) {
                    bucket.push(server);
                }
            }
        }

        let logic_num = buckets.iter().map(Vec::len).max().unwrap_or(0);
        if task_row >= logic_num {
            return None;
        }
        let full_tor_num = buckets.iter().map(Vec::len).min().unwrap_or(0);
        if task_row > full_tor_num || buckets[..=task_column].iter().any(|b| b.len() <= task_row) {
            return None;
        }

        let tors = (0..logic_num)
            .map(|k| Tor {
                id: format!("logic-{k}"),
                servers: buckets
                    .iter()
                    .filter_map(|bucket| bucket.get(k).map(|s| (*s).clone()))
                    .collect(),
            })
            .collect();
        Some(LogicTorSelection { tors, full_tor_num })
    }
}

/// Splits `task_num` tasks into rows of `slice_num`.
///
/// Returns `(row, column)` of the last task, or `None` for empty inputs.
#[must_use]
pub fn task_row_and_column(task_num: usize, slice_num: usize) -> Option<(usize, usize)> {
    if task_num == 0 || slice_num == 0 {
        return None;
    }
    Some((task_num.div_ceil(slice_num) - 1, (task_num - 1) % slice_num))
}

/// Takes the first `task_row` Tors in full plus the first `task_column + 1`
/// servers of Tor `task_row`.
#[must_use]
pub fn select_job_servers(tors: &[Tor], task_row: usize, task_column: usize) -> Vec<TorServer> {
    let mut servers: Vec<TorServer> = tors
        .iter()
        .take(task_row)
        .flat_map(|t| t.servers.iter().cloned())
        .collect();
    if let Some(last) = tors.get(task_row) {
        servers.extend(last.servers.iter().take(task_column + 1).cloned());
    }
    servers
}

/// Plans which Tor servers a job's tasks land on.
#[derive(Debug, Clone, Copy)]
pub struct TorGrouper<'a> {
    list: &'a TorList,
}

impl<'a> TorGrouper<'a> {
    /// Creates a grouper over a claimed Tor list.
    #[must_use]
    pub const fn new(list: &'a TorList) -> Self {
        Self { list }
    }

    /// Picks `task_num` servers for the job, in task order.
    pub fn plan(&self, job: &str, task_num: usize) -> Result<Vec<TorServer>> {
        let slice_num = self.list.slice_num();
        if slice_num == 0 || slice_num > MAX_SLICE_NUM {
            return Err(SchedulerError::SliceNumExceeded {
                slice_num,
                max: MAX_SLICE_NUM,
            });
        }
        let insufficient = || SchedulerError::InsufficientTors {
            job: job.to_owned(),
            task_num,
        };
        let Some((task_row, task_column)) = task_row_and_column(task_num, slice_num) else {
            return Ok(Vec::new());
        };

        let mut physical: Vec<Tor> = self.list.tors().iter().map(|t| t.claimed_only(job)).collect();
        physical.sort_by_key(|t| (Reverse(t.servers.len()), t.id.clone()));

        if task_num < slice_num {
            if let Some(tor) = physical.iter().find(|t| t.servers.len() >= task_num) {
                debug!(job, tor = %tor.id, task_num, "Job packed into one Tor");
                return Ok(tor.servers.iter().take(task_num).cloned().collect());
            }
        }

        if task_row < self.list.full_tor_num(job) {
            debug!(job, task_row, task_column, "Job placed on physical Tors");
            return Ok(select_job_servers(&physical, task_row, task_column));
        }

        let selection = self
            .list
            .logic_tors_and_full_tor_num(job, task_column, task_row, slice_num)
            .ok_or_else(insufficient)?;
        debug!(
            job,
            task_row,
            task_column,
            full_tor_num = selection.full_tor_num,
            "Job placed on logical Tors"
        );
        let servers = select_job_servers(&selection.tors, task_row, task_column);
        if servers.len() < task_num {
            return Err(insufficient());
        }
        Ok(servers)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rstest::rstest;

    const JOB: &str = "job-1";

    fn list(tor_num: usize, slice_num: usize, claimed: usize) -> TorList {
        let mut taken = 0;
        let tors = (0..tor_num)
            .map(|t| Tor {
                id: format!("tor-{t:02}"),
                servers: (0..slice_num)
                    .map(|s| {
                        let current_job = (taken < claimed).then(|| JOB.to_owned());
                        taken += 1;
                        TorServer {
                            name: format!("node-{t:02}-{s}"),
                            slice_id: s,
                            current_job,
                        }
                    })
                    .collect(),
            })
            .collect();
        TorList::new(tors, slice_num)
    }

    #[rstest]
    #[case(1, 4, (0, 0))]
    #[case(4, 4, (0, 3))]
    #[case(5, 4, (1, 0))]
    #[case(18, 4, (4, 1))]
    fn row_and_column(#[case] tasks: usize, #[case] slices: usize, #[case] expected: (usize, usize)) {
        assert_eq!(task_row_and_column(tasks, slices), Some(expected));
    }

    #[test]
    fn row_and_column_rejects_empty() {
        assert_eq!(task_row_and_column(0, 4), None);
        assert_eq!(task_row_and_column(4, 0), None);
    }

    #[test]
    fn full_tor_num_counts_complete_racks() {
        let tors = list(32, 4, 18);
        assert_eq!(tors.full_tor_num(JOB), 4);
        assert_eq!(tors.full_tor_num("other"), 0);
    }

    #[test]
    fn retain_job_releases_unplanned_claims() {
        let mut tors = list(2, 4, 8);
        tors.tors[1].servers[0].current_job = Some("other".to_owned());
        let keep: BTreeSet<String> = ["node-00-0", "node-00-1", "node-01-0"]
            .into_iter()
            .map(str::to_owned)
            .collect();

        tors.retain_job(JOB, &keep);

        let claims: Vec<Option<&str>> = tors
            .tors()
            .iter()
            .flat_map(|t| t.servers.iter().map(|s| s.current_job.as_deref()))
            .collect();
        assert_eq!(
            claims,
            vec![
                Some(JOB),
                Some(JOB),
                None,
                None,
                Some("other"),
                None,
                None,
                None
            ]
        );
    }

    #[test]
    fn select_job_servers_takes_rows_then_prefix() {
        let tors = list(3, 4, 12);
        let servers = select_job_servers(tors.tors(), 1, 1);
        let names: Vec<&str> = servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["node-00-0", "node-00-1", "node-00-2", "node-00-3", "node-01-0", "node-01-1"]
        );
    }

    #[test]
    fn mark_by_job_claims_only_free_candidates() {
        let mut tors = list(2, 2, 1);
        let candidates: BTreeSet<String> = ["node-00-0", "node-00-1", "node-01-1"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        assert_eq!(tors.mark_by_job(&candidates, "job-2"), 2);
        assert_eq!(tors.tors()[0].claimed_by(JOB), 1);
        assert_eq!(tors.tors()[0].claimed_by("job-2"), 1);
        tors.release_job("job-2");
        assert_eq!(tors.tors()[1].claimed_by("job-2"), 0);
    }

    #[test]
    fn plan_packs_small_job_into_one_tor() {
        let tors = list(4, 4, 7);
        let servers = TorGrouper::new(&tors).plan(JOB, 3).unwrap();
        assert!(servers.iter().all(|s| s.name.starts_with("node-00")));
    }

    #[test]
    fn plan_prefers_full_physical_tors() {
        let tors = list(4, 4, 10);
        let servers = TorGrouper::new(&tors).plan(JOB, 6).unwrap();
        assert_eq!(servers.len(), 6);
        assert_eq!(servers[4].name, "node-01-0");
    }

    #[test]
    fn plan_fails_without_capacity() {
        let tors = list(4, 4, 5);
        assert!(matches!(
            TorGrouper::new(&tors).plan(JOB, 9),
            Err(SchedulerError::InsufficientTors { .. })
        ));
    }

    #[test]
    fn plan_rejects_oversized_slice_count() {
        let tors = TorList::new(Vec::new(), MAX_SLICE_NUM + 1);
        assert!(matches!(
            TorGrouper::new(&tors).plan(JOB, 1),
            Err(SchedulerError::SliceNumExceeded { .. })
        ));
    }
}
