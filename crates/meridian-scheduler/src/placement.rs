//! Job placement and rank-table assembly.

use meridian_ranktable::{
    keys, Instance, InstanceDevice, PodRef, RankTable, RankTableRegistry, RankTableStatus,
    RankTableVersion, SuperPodGrouping,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::affinity::rank_nodes;
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::inventory::{InventorySnapshot, Job, NpuNode, TaskRequest};
use crate::policy::{PolicyHandler, PolicyRegistry, TopologyClass};
use crate::tor::{TorGrouper, TorList};
use crate::vnpu::{new_strategy, ScoreMap, VTemplateCatalogue, VnpuAllocation, VnpuStrategy};

/// Where one task landed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskBinding {
    /// Pod name.
    pub task: String,
    /// Pod UID.
    pub pod_uid: String,
    /// Replica role.
    pub role: String,
    /// Node name.
    pub node: String,
    /// Host address of the node.
    pub server_id: String,
    /// Whole chips, or the single chip hosting the virtual chip.
    pub chips: Vec<u32>,
    /// Virtual chip, for sliced tasks.
    pub vnpu: Option<VnpuAllocation>,
    /// Rank index of the pod within the job.
    pub rank_index: usize,
}

impl TaskBinding {
    /// Device payload for the rank table.
    #[must_use]
    pub fn instance(&self, node: &NpuNode) -> Instance {
        Instance {
            pod_name: self.task.clone(),
            server_id: self.server_id.clone(),
            devices: self
                .chips
                .iter()
                .map(|chip| InstanceDevice {
                    device_id: chip.to_string(),
                    device_ip: node.device_ip(*chip),
                })
                .collect(),
        }
    }

    /// Identity of the bound pod.
    #[must_use]
    pub fn pod_ref(&self, job: &Job, node: &NpuNode) -> PodRef {
        let pod = PodRef::new(&job.namespace, &self.task, &self.pod_uid);
        match &node.super_pod_id {
            Some(rank) => pod.with_super_pod_rank(rank),
            None => pod,
        }
    }

    /// Annotations to write on the bound pod.
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = self
            .vnpu
            .as_ref()
            .map(|v| v.annotations.clone())
            .unwrap_or_default();
        annotations.insert(keys::POD_RANK_INDEX.to_owned(), self.rank_index.to_string());
        let chips: Vec<String> = self.chips.iter().map(u32::to_string).collect();
        annotations.insert(keys::POD_NPU_CHIPS.to_owned(), chips.join(","));
        annotations
    }
}

/// Placement of every task of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    /// Job UID.
    pub job_uid: String,
    /// Topology class used.
    #[serde(serialize_with = "serialize_class")]
    pub class: TopologyClass,
    /// Bindings in rank order.
    pub bindings: Vec<TaskBinding>,
}

fn serialize_class<S: serde::Serializer>(
    class: &TopologyClass,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(class.policy_name())
}

/// Places jobs against an inventory snapshot and builds their rank tables.
pub struct PlacementEngine {
    policies: Arc<PolicyRegistry>,
    vnpu: Box<dyn VnpuStrategy>,
    tables: Arc<RankTableRegistry>,
    tor_enabled: bool,
    slice_num: usize,
    max_rank_index: i64,
}

impl std::fmt::Debug for PlacementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementEngine")
            .field("policies", &self.policies)
            .field("vnpu", &self.vnpu.name())
            .field("tor_enabled", &self.tor_enabled)
            .field("slice_num", &self.slice_num)
            .finish_non_exhaustive()
    }
}

impl PlacementEngine {
    /// Creates an engine from configuration.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyRegistry>,
        tables: Arc<RankTableRegistry>,
        config: &SchedulerConfig,
    ) -> Self {
        let catalogue = VTemplateCatalogue::with_overrides(&config.vnpu.templates);
        Self {
            policies,
            vnpu: new_strategy(config.vnpu.mode, catalogue),
            tables,
            tor_enabled: config.tor.enabled,
            slice_num: config.tor.slice_num,
            max_rank_index: config.ranktable.max_rank_index,
        }
    }

    /// Rank tables built so far.
    #[must_use]
    pub fn tables(&self) -> &Arc<RankTableRegistry> {
        &self.tables
    }

    /// Places a job without changing the snapshot.
    pub fn place_job(&self, job: &Job, snapshot: &InventorySnapshot) -> Result<Placement> {
        self.plan(job, snapshot).map(|(placement, _)| placement)
    }

    /// Places a job and commits its consumption into the snapshot.
    ///
    /// On failure the snapshot is left untouched.
    pub fn bind_job(&self, job: &Job, snapshot: &mut InventorySnapshot) -> Result<Placement> {
        let (placement, working) = self.plan(job, snapshot)?;
        *snapshot = working;
        Ok(placement)
    }

    fn plan(&self, job: &Job, snapshot: &InventorySnapshot) -> Result<(Placement, InventorySnapshot)> {
        let handler = self.policies.handler_for(job)?;
        handler.validate_job(job)?;

        let tasks = job.tasks();
        let mut working = snapshot.clone();
        let bindings = if job.uses_vnpu() {
            self.place_vnpu(handler, &tasks, &mut working)?
        } else {
            self.place_whole_chips(job, handler, &tasks, &mut working)?
        };

        info!(
            job = %job.uid,
            policy = %handler.class(),
            tasks = bindings.len(),
            "Job placed"
        );
        Ok((
            Placement {
                job_uid: job.uid.clone(),
                class: handler.class(),
                bindings,
            },
            working,
        ))
    }

    fn place_whole_chips(
        &self,
        job: &Job,
        handler: &PolicyHandler,
        tasks: &[TaskRequest],
        working: &mut InventorySnapshot,
    ) -> Result<Vec<TaskBinding>> {
        let tor_plan = self.tor_plan(job, handler, tasks, working)?;
        let mut bindings = Vec::with_capacity(tasks.len());

        for (rank_index, task) in tasks.iter().enumerate() {
            let request = usize::try_from(task.chips).unwrap_or(usize::MAX);
            let candidates: Vec<&NpuNode> = match &tor_plan {
                Some(plan) => plan
                    .get(rank_index)
                    .and_then(|name| working.node(name))
                    .into_iter()
                    .collect(),
                None => working.nodes.iter().filter(|n| handler.accepts_node(n)).collect(),
            };
            let best = rank_nodes(handler.matrix(), candidates, request)
                .into_iter()
                .next()
                .ok_or_else(|| SchedulerError::NoFeasibleNode {
                    task: task.name.clone(),
                })?;

            let node = working.node_mut(&best.node)?;
            node.reserve(&best.chips)?;
            debug!(
                task = %task.name,
                node = %node.name,
                chips = ?best.chips,
                score = best.score,
                "Task bound"
            );
            bindings.push(TaskBinding {
                task: task.name.clone(),
                pod_uid: task.uid.clone(),
                role: task.role.clone(),
                node: node.name.clone(),
                server_id: node.address.clone(),
                chips: best.chips,
                vnpu: None,
                rank_index,
            });
        }
        Ok(bindings)
    }

    /// Orders nodes by Tor layout for Tor-affine multi-task jobs.
    fn tor_plan(
        &self,
        job: &Job,
        handler: &PolicyHandler,
        tasks: &[TaskRequest],
        working: &mut InventorySnapshot,
    ) -> Result<Option<Vec<String>>> {
        if !self.tor_enabled || !job.is_tor_affine() || working.tors.is_empty() || tasks.len() < 2 {
            return Ok(None);
        }

        let request = tasks
            .iter()
            .map(|t| usize::try_from(t.chips).unwrap_or(usize::MAX))
            .max()
            .unwrap_or(0);
        let candidates: BTreeSet<String> = rank_nodes(
            handler.matrix(),
            working.nodes.iter().filter(|n| handler.accepts_node(n)),
            request,
        )
        .into_iter()
        .map(|score| score.node)
        .collect();

        let mut list = TorList::new(std::mem::take(&mut working.tors), self.slice_num);
        list.mark_by_job(&candidates, &job.uid);
        let servers = TorGrouper::new(&list).plan(&job.uid, tasks.len())?;
        let planned: Vec<String> = servers.into_iter().map(|s| s.name).collect();
        list.retain_job(&job.uid, &planned.iter().cloned().collect());
        working.tors = list.tors().to_vec();

        info!(job = %job.uid, servers = planned.len(), "Tor plan built");
        Ok(Some(planned))
    }

    fn place_vnpu(
        &self,
        handler: &PolicyHandler,
        tasks: &[TaskRequest],
        working: &mut InventorySnapshot,
    ) -> Result<Vec<TaskBinding>> {
        let mut bindings = Vec::with_capacity(tasks.len());

        for (rank_index, task) in tasks.iter().enumerate() {
            let resource = task.vresource.ok_or_else(|| {
                SchedulerError::InvalidJob(format!("task {} has no virtual resource", task.name))
            })?;

            let feasible: Vec<&NpuNode> = working
                .nodes
                .iter()
                .filter(|n| handler.accepts_node(n))
                .filter(|n| self.vnpu.check_node_npu_by_task(task, n, &resource).is_ok())
                .collect();
            let mut scores = ScoreMap::new();
            self.vnpu.score_best_npu_nodes(task, &feasible, &mut scores)?;

            let best = feasible
                .iter()
                .map(|n| (n.name.as_str(), scores.get(&n.name).copied().unwrap_or(0.0)))
                .max_by(|a, b| match a.1.total_cmp(&b.1) {
                    Ordering::Equal => b.0.cmp(a.0),
                    other => other,
                })
                .map(|(name, _)| name.to_owned())
                .ok_or_else(|| SchedulerError::NoFeasibleNode {
                    task: task.name.clone(),
                })?;

            let node = working.node_mut(&best)?;
            let template = self
                .vnpu
                .select_template(node.chip_type, &resource)
                .ok_or(SchedulerError::NoMatchingTemplate {
                    aicore: resource.aicore,
                    memory_mb: resource.memory_mb,
                })?;
            let allocation = self
                .vnpu
                .use_annotation(task, node, &resource, template)
                .ok_or_else(|| SchedulerError::InsufficientVnpu {
                    node: node.name.clone(),
                    template: template.name.clone(),
                })?;
            self.vnpu.commit(node, &allocation)?;

            debug!(
                task = %task.name,
                node = %node.name,
                chip = allocation.chip_id,
                template = %allocation.template,
                strategy = self.vnpu.name(),
                "vNPU task bound"
            );
            bindings.push(TaskBinding {
                task: task.name.clone(),
                pod_uid: task.uid.clone(),
                role: task.role.clone(),
                node: node.name.clone(),
                server_id: node.address.clone(),
                chips: vec![allocation.chip_id],
                vnpu: Some(allocation),
                rank_index,
            });
        }
        Ok(bindings)
    }

    /// Caches every binding into the job's rank table and marks it complete.
    pub fn assemble_rank_table(
        &self,
        job: &Job,
        placement: &Placement,
        snapshot: &InventorySnapshot,
    ) -> Result<Arc<RankTable>> {
        let version = RankTableVersion::for_job(&job.annotations, &job.labels);
        let table = self.tables.get_or_create(&job.uid, || {
            RankTable::new(version)
                .with_grouping(SuperPodGrouping::for_job(&job.annotations, &job.labels))
                .with_max_devices(placement.class.server_slots())
                .with_max_rank_index(self.max_rank_index)
        });

        for binding in &placement.bindings {
            let node = snapshot
                .node(&binding.node)
                .ok_or_else(|| SchedulerError::NodeNotFound(binding.node.clone()))?;
            table.cache_pod_info(
                &binding.pod_ref(job, node),
                &binding.instance(node),
                &binding.rank_index.to_string(),
            )?;
        }
        table.set_status(RankTableStatus::Completed);

        info!(
            job = %job.uid,
            version = %table.version(),
            servers = table.server_count(),
            "Rank table assembled"
        );
        Ok(table)
    }

    /// Drops a job's rank table.
    pub fn release_job(&self, job_uid: &str) -> bool {
        self.tables.remove(job_uid).is_some()
    }
}
