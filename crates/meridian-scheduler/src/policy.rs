//! Topology classes and schedule-policy dispatch.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::affinity::AffinityMatrix;
use crate::config::PlacementConfig;
use crate::error::{Result, SchedulerError};
use crate::inventory::{Job, NpuNode};

/// Server topology a job is scheduled against.
///
/// `chipM-nodeN` allocates in modules of M chips on servers with N slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TopologyClass {
    /// One chip per module, two slots.
    Chip1Node2,
    /// One four-chip module per server.
    Chip4Node4,
    /// Two four-chip modules per server.
    Chip4Node8,
    /// One eight-chip module per server.
    Chip8Node8,
    /// Two eight-chip modules per server.
    Chip8Node16,
    /// Eight two-chip modules per server.
    Chip2Node16,
    /// Two-chip modules on super-pod servers.
    Chip2Node16Sp,
}

impl TopologyClass {
    /// Every supported class.
    pub const ALL: [Self; 7] = [
        Self::Chip1Node2,
        Self::Chip4Node4,
        Self::Chip4Node8,
        Self::Chip8Node8,
        Self::Chip8Node16,
        Self::Chip2Node16,
        Self::Chip2Node16Sp,
    ];

    /// Parses a schedule-policy name.
    #[must_use]
    pub fn from_policy_name(name: &str) -> Option<Self> {
        match name {
            "chip1-node2" => Some(Self::Chip1Node2),
            "chip4-node4" => Some(Self::Chip4Node4),
            "chip4-node8" => Some(Self::Chip4Node8),
            "chip8-node8" => Some(Self::Chip8Node8),
            "chip8-node16" => Some(Self::Chip8Node16),
            "chip2-node16" => Some(Self::Chip2Node16),
            "chip2-node16-sp" => Some(Self::Chip2Node16Sp),
            _ => None,
        }
    }

    /// Schedule-policy name of the class.
    #[must_use]
    pub const fn policy_name(self) -> &'static str {
        match self {
            Self::Chip1Node2 => "chip1-node2",
            Self::Chip4Node4 => "chip4-node4",
            Self::Chip4Node8 => "chip4-node8",
            Self::Chip8Node8 => "chip8-node8",
            Self::Chip8Node16 => "chip8-node16",
            Self::Chip2Node16 => "chip2-node16",
            Self::Chip2Node16Sp => "chip2-node16-sp",
        }
    }

    /// Chips per interconnect module.
    #[must_use]
    pub const fn module_size(self) -> usize {
        match self {
            Self::Chip1Node2 => 1,
            Self::Chip2Node16 | Self::Chip2Node16Sp => 2,
            Self::Chip4Node4 | Self::Chip4Node8 => 4,
            Self::Chip8Node8 | Self::Chip8Node16 => 8,
        }
    }

    /// Chip slots per server.
    #[must_use]
    pub const fn server_slots(self) -> usize {
        match self {
            Self::Chip1Node2 => 2,
            Self::Chip4Node4 => 4,
            Self::Chip4Node8 | Self::Chip8Node8 => 8,
            Self::Chip8Node16 | Self::Chip2Node16 | Self::Chip2Node16Sp => 16,
        }
    }

    /// Returns true for super-pod classes.
    #[must_use]
    pub const fn is_super_pod(self) -> bool {
        matches!(self, Self::Chip2Node16Sp)
    }
}

impl fmt::Display for TopologyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.policy_name())
    }
}

/// Placement rules for one topology class.
#[derive(Debug, Clone)]
pub struct PolicyHandler {
    class: TopologyClass,
    matrix: AffinityMatrix,
}

impl PolicyHandler {
    /// Creates the handler and its affinity matrix.
    #[must_use]
    pub fn new(class: TopologyClass) -> Self {
        Self {
            class,
            matrix: AffinityMatrix::new(class.server_slots(), class.module_size()),
        }
    }

    /// Topology class served.
    #[must_use]
    pub const fn class(&self) -> TopologyClass {
        self.class
    }

    /// Affinity matrix of the class.
    #[must_use]
    pub const fn matrix(&self) -> &AffinityMatrix {
        &self.matrix
    }

    /// Returns true if every chip on the node fits the class's slots.
    #[must_use]
    pub fn accepts_node(&self, node: &NpuNode) -> bool {
        node.chips
            .iter()
            .all(|chip| usize::try_from(*chip).is_ok_and(|c| c < self.class.server_slots()))
    }

    /// Checks a job's shape against the class.
    pub fn validate_job(&self, job: &Job) -> Result<()> {
        if job.task_count() == 0 {
            return Err(SchedulerError::InvalidJob(format!("job {} has no tasks", job.uid)));
        }
        if job.uses_vnpu() {
            return self.validate_vnpu_job(job);
        }

        let slots = self.class.server_slots();
        let module = self.class.module_size();
        for (role, spec) in &job.replicas {
            let chips = usize::try_from(spec.chips_per_replica).unwrap_or(usize::MAX);
            if chips == 0 || chips > slots {
                return Err(SchedulerError::InvalidJob(format!(
                    "role {role} of job {} requests {chips} chips, {} allows 1..={slots}",
                    job.uid, self.class
                )));
            }
            if chips > module && chips % module != 0 {
                return Err(SchedulerError::InvalidJob(format!(
                    "role {role} of job {} requests {chips} chips, not a multiple of module size {module}",
                    job.uid
                )));
            }
        }

        // Rank IDs assume one device count per job
        let counts: BTreeSet<u32> = job.replicas.values().map(|s| s.chips_per_replica).collect();
        if counts.len() > 1 {
            return Err(SchedulerError::InvalidJob(format!(
                "roles of job {} request different chip counts {counts:?}",
                job.uid
            )));
        }
        Ok(())
    }

    fn validate_vnpu_job(&self, job: &Job) -> Result<()> {
        for (role, spec) in &job.replicas {
            match spec.vresource {
                Some(resource) if resource.aicore > 0 && spec.chips_per_replica == 0 => {}
                _ => {
                    return Err(SchedulerError::InvalidJob(format!(
                        "role {role} of job {} mixes whole and virtual chips or requests no AI cores",
                        job.uid
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Enabled policy handlers, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    handlers: BTreeMap<TopologyClass, PolicyHandler>,
}

impl PolicyRegistry {
    /// Creates a registry serving the given classes.
    #[must_use]
    pub fn new(classes: impl IntoIterator<Item = TopologyClass>) -> Self {
        let handlers = classes
            .into_iter()
            .map(|class| (class, PolicyHandler::new(class)))
            .collect();
        Self { handlers }
    }

    /// Creates a registry serving every class.
    #[must_use]
    pub fn with_all() -> Self {
        Self::new(TopologyClass::ALL)
    }

    /// Creates a registry from the enabled policy list.
    ///
    /// An unknown policy name is a configuration error.
    pub fn from_config(config: &PlacementConfig) -> Result<Self> {
        let classes = config
            .enabled_policies
            .iter()
            .map(|name| {
                TopologyClass::from_policy_name(name)
                    .ok_or_else(|| SchedulerError::Config(format!("unknown schedule policy {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(classes))
    }

    /// Returns the handler of an enabled class.
    #[must_use]
    pub fn get(&self, class: TopologyClass) -> Option<&PolicyHandler> {
        self.handlers.get(&class)
    }

    /// Enabled classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = TopologyClass> + '_ {
        self.handlers.keys().copied()
    }

    /// Selects the handler for a job's schedule policy.
    ///
    /// Missing, unknown and disabled policies all yield `None`.
    #[must_use]
    pub fn select_handler(&self, job: &Job) -> Option<&PolicyHandler> {
        let class = TopologyClass::from_policy_name(job.policy_name()?)?;
        self.get(class)
    }

    /// Like [`select_handler`](Self::select_handler), reporting why no handler
    /// matched.
    pub fn handler_for(&self, job: &Job) -> Result<&PolicyHandler> {
        let name = job.policy_name().ok_or_else(|| SchedulerError::MissingPolicy {
            job: job.uid.clone(),
        })?;
        let handler = self
            .select_handler(job)
            .ok_or_else(|| SchedulerError::UnknownPolicy(name.to_owned()))?;
        debug!(job = %job.uid, policy = %handler.class(), "Policy handler selected");
        Ok(handler)
    }
}
