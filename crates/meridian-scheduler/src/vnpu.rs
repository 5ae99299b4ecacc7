//! Virtual-chip (vNPU) allocation.
//!
//! A sliced task asks for a fraction of one chip. Static mode hands out
//! pre-partitioned slices; dynamic mode carves templates from free capacity.

use meridian_ranktable::{keys, ChipType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Result, SchedulerError};
use crate::inventory::{NpuNode, TaskRequest};

/// Highest score one strategy adds for a node.
pub const VNPU_MAX_SCORE: f64 = 100.0;

/// Accumulated node scores for one task, keyed by node name.
pub type ScoreMap = BTreeMap<String, f64>;

/// Virtual-chip request of one task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VResource {
    /// AI cores requested.
    pub aicore: u32,
    /// Memory requested, in MB.
    #[serde(default)]
    pub memory_mb: u64,
}

/// Virtual-chip allocation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VTemplate {
    /// Template name, written into the `npu-core` annotation.
    pub name: String,
    /// AI cores per slice.
    pub aicore: u32,
    /// Memory per slice, in MB.
    pub memory_mb: u64,
    /// Chips the template may bind to; empty means any.
    #[serde(default)]
    pub chip_indices: Vec<u32>,
}

impl VTemplate {
    fn new(name: &str, aicore: u32, memory_mb: u64) -> Self {
        Self {
            name: name.to_owned(),
            aicore,
            memory_mb,
            chip_indices: Vec::new(),
        }
    }

    /// Returns true if the template may bind to the chip.
    #[must_use]
    pub fn allows(&self, chip: u32) -> bool {
        self.chip_indices.is_empty() || self.chip_indices.contains(&chip)
    }

    /// Returns true if one slice satisfies the request.
    #[must_use]
    pub const fn covers(&self, resource: &VResource) -> bool {
        self.aicore >= resource.aicore && self.memory_mb >= resource.memory_mb
    }
}

/// Templates available per chip family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VTemplateCatalogue {
    templates: BTreeMap<ChipType, Vec<VTemplate>>,
}

impl Default for VTemplateCatalogue {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert(
            ChipType::TrainX8,
            vec![
                VTemplate::new("vir02", 2, 2048),
                VTemplate::new("vir04", 4, 4096),
                VTemplate::new("vir08", 8, 8192),
                VTemplate::new("vir16", 16, 16384),
            ],
        );
        templates.insert(
            ChipType::TrainX16,
            vec![
                VTemplate::new("vir03", 3, 8192),
                VTemplate::new("vir06", 6, 16384),
                VTemplate::new("vir12", 12, 32768),
            ],
        );
        templates.insert(
            ChipType::InferX8,
            vec![
                VTemplate::new("vir01", 1, 3072),
                VTemplate::new("vir02", 2, 6144),
                VTemplate::new("vir04", 4, 12288),
            ],
        );
        Self { templates }
    }
}

impl VTemplateCatalogue {
    /// Creates the default catalogue with per-family overrides applied.
    #[must_use]
    pub fn with_overrides(overrides: &BTreeMap<ChipType, Vec<VTemplate>>) -> Self {
        let mut catalogue = Self::default();
        for (chip_type, templates) in overrides {
            let mut templates = templates.clone();
            templates.sort_by_key(|t| (t.aicore, t.memory_mb));
            catalogue.templates.insert(*chip_type, templates);
        }
        catalogue
    }

    /// Templates of a chip family, smallest first.
    #[must_use]
    pub fn templates(&self, chip_type: ChipType) -> &[VTemplate] {
        self.templates.get(&chip_type).map_or(&[], Vec::as_slice)
    }

    /// Looks up a template by name.
    #[must_use]
    pub fn get(&self, chip_type: ChipType, name: &str) -> Option<&VTemplate> {
        self.templates(chip_type).iter().find(|t| t.name == name)
    }

    /// Template with exactly the requested AI cores and enough memory.
    #[must_use]
    pub fn exact(&self, chip_type: ChipType, resource: &VResource) -> Option<&VTemplate> {
        self.templates(chip_type)
            .iter()
            .find(|t| t.aicore == resource.aicore && t.memory_mb >= resource.memory_mb)
    }

    /// Smallest template covering the request.
    #[must_use]
    pub fn covering(&self, chip_type: ChipType, resource: &VResource) -> Option<&VTemplate> {
        self.templates(chip_type).iter().find(|t| t.covers(resource))
    }
}

/// Slicing strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VnpuMode {
    /// Pre-partitioned slices.
    #[default]
    Static,
    /// Slices carved on demand.
    Dynamic,
}

/// Virtual chip granted to one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VnpuAllocation {
    /// Task name.
    pub task: String,
    /// Node name.
    pub node: String,
    /// Physical chip index.
    pub chip_id: u32,
    /// Template name.
    pub template: String,
    /// AI cores granted.
    pub aicore: u32,
    /// Memory granted, in MB.
    pub memory_mb: u64,
    /// Annotations to put on the bound pod.
    pub annotations: BTreeMap<String, String>,
}

impl VnpuAllocation {
    fn new(task: &TaskRequest, node: &NpuNode, chip_id: u32, template: &VTemplate) -> Self {
        let mut annotations = BTreeMap::new();
        annotations.insert(
            keys::POD_NPU_CORE.to_owned(),
            format!("{chip_id}-{}", template.name),
        );
        Self {
            task: task.name.clone(),
            node: node.name.clone(),
            chip_id,
            template: template.name.clone(),
            aicore: template.aicore,
            memory_mb: template.memory_mb,
            annotations,
        }
    }
}

/// Virtual-chip allocation strategy.
pub trait VnpuStrategy: Send + Sync {
    /// Checks that the node can host the task's virtual chip.
    fn check_node_npu_by_task(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
    ) -> Result<()>;

    /// Adds this strategy's score for each node into `score_map`.
    ///
    /// Entries are accumulated, never replaced. Nodes that cannot host the
    /// task are left untouched.
    fn score_best_npu_nodes(
        &self,
        task: &TaskRequest,
        nodes: &[&NpuNode],
        score_map: &mut ScoreMap,
    ) -> Result<()>;

    /// Builds the allocation and pod annotations for a chosen node.
    ///
    /// Returns `None` when the template does not cover the request or no chip
    /// on the node can take it.
    fn use_annotation(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
        template: &VTemplate,
    ) -> Option<VnpuAllocation>;

    /// Picks the template this strategy uses for a request.
    fn select_template(&self, chip_type: ChipType, resource: &VResource) -> Option<&VTemplate>;

    /// Consumes the allocation's capacity on the node.
    fn commit(&self, node: &mut NpuNode, allocation: &VnpuAllocation) -> Result<()>;

    /// Returns the strategy name.
    fn name(&self) -> &'static str;
}

/// Creates the strategy for a mode.
#[must_use]
pub fn new_strategy(mode: VnpuMode, catalogue: VTemplateCatalogue) -> Box<dyn VnpuStrategy> {
    match mode {
        VnpuMode::Static => Box::new(StaticVnpu::new(catalogue)),
        VnpuMode::Dynamic => Box::new(DynamicVnpu::new(catalogue)),
    }
}

fn requested(task: &TaskRequest, resource: &VResource) -> Result<()> {
    if task.vresource.is_none() || resource.aicore == 0 {
        return Err(SchedulerError::InvalidJob(format!(
            "task {} requests no virtual AI cores",
            task.name
        )));
    }
    Ok(())
}

fn no_template(resource: &VResource) -> SchedulerError {
    SchedulerError::NoMatchingTemplate {
        aicore: resource.aicore,
        memory_mb: resource.memory_mb,
    }
}

fn charge(node: &mut NpuNode, allocation: &VnpuAllocation) -> Result<()> {
    let node_name = node.name.clone();
    let vchip = node
        .vchip_mut(allocation.chip_id)
        .ok_or_else(|| SchedulerError::InsufficientVnpu {
            node: node_name.clone(),
            template: allocation.template.clone(),
        })?;
    if vchip.free_aicore < allocation.aicore || vchip.free_memory_mb < allocation.memory_mb {
        return Err(SchedulerError::InsufficientVnpu {
            node: node_name,
            template: allocation.template.clone(),
        });
    }
    vchip.free_aicore -= allocation.aicore;
    vchip.free_memory_mb -= allocation.memory_mb;
    Ok(())
}

/// Allocates from pre-partitioned slices.
#[derive(Debug, Clone, Default)]
pub struct StaticVnpu {
    catalogue: VTemplateCatalogue,
}

impl StaticVnpu {
    /// Creates the strategy over a catalogue.
    #[must_use]
    pub const fn new(catalogue: VTemplateCatalogue) -> Self {
        Self { catalogue }
    }

    fn slice_chips<'n>(node: &'n NpuNode, template: &'n VTemplate) -> impl Iterator<Item = u32> + 'n {
        node.vchips
            .iter()
            .filter(move |v| {
                template.allows(v.chip_id)
                    && !node.used.contains(v.chip_id)
                    && v.static_slices.iter().any(|s| *s == template.name)
            })
            .map(|v| v.chip_id)
    }

    fn free_slices(node: &NpuNode, template: &VTemplate) -> usize {
        node.vchips
            .iter()
            .filter(|v| template.allows(v.chip_id) && !node.used.contains(v.chip_id))
            .map(|v| v.static_slices.iter().filter(|s| **s == template.name).count())
            .sum()
    }
}

impl VnpuStrategy for StaticVnpu {
    fn check_node_npu_by_task(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
    ) -> Result<()> {
        requested(task, resource)?;
        let template = self
            .select_template(node.chip_type, resource)
            .ok_or_else(|| no_template(resource))?;
        if Self::slice_chips(node, template).next().is_none() {
            return Err(SchedulerError::InsufficientVnpu {
                node: node.name.clone(),
                template: template.name.clone(),
            });
        }
        Ok(())
    }

    fn score_best_npu_nodes(
        &self,
        task: &TaskRequest,
        nodes: &[&NpuNode],
        score_map: &mut ScoreMap,
    ) -> Result<()> {
        let resource = task.vresource.unwrap_or_default();
        requested(task, &resource)?;
        for node in nodes {
            let Some(template) = self.select_template(node.chip_type, &resource) else {
                continue;
            };
            let free = Self::free_slices(node, template);
            if free == 0 {
                continue;
            }
            // Fewer matching slices left means a tighter pack.
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            let score = VNPU_MAX_SCORE / free as f64;
            *score_map.entry(node.name.clone()).or_insert(0.0) += score;
        }
        debug!(task = %task.name, strategy = self.name(), ?score_map, "vNPU nodes scored");
        Ok(())
    }

    fn use_annotation(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
        template: &VTemplate,
    ) -> Option<VnpuAllocation> {
        if !template.covers(resource) {
            return None;
        }
        let chip = Self::slice_chips(node, template).next()?;
        Some(VnpuAllocation::new(task, node, chip, template))
    }

    fn select_template(&self, chip_type: ChipType, resource: &VResource) -> Option<&VTemplate> {
        self.catalogue.exact(chip_type, resource)
    }

    fn commit(&self, node: &mut NpuNode, allocation: &VnpuAllocation) -> Result<()> {
        let node_name = node.name.clone();
        let missing = || SchedulerError::InsufficientVnpu {
            node: node_name.clone(),
            template: allocation.template.clone(),
        };
        let vchip = node.vchip_mut(allocation.chip_id).ok_or_else(missing)?;
        let position = vchip
            .static_slices
            .iter()
            .position(|s| *s == allocation.template)
            .ok_or_else(missing)?;
        vchip.static_slices.remove(position);
        vchip.free_aicore = vchip.free_aicore.saturating_sub(allocation.aicore);
        vchip.free_memory_mb = vchip.free_memory_mb.saturating_sub(allocation.memory_mb);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Carves templates from free chip capacity.
#[derive(Debug, Clone, Default)]
pub struct DynamicVnpu {
    catalogue: VTemplateCatalogue,
}

impl DynamicVnpu {
    /// Creates the strategy over a catalogue.
    #[must_use]
    pub const fn new(catalogue: VTemplateCatalogue) -> Self {
        Self { catalogue }
    }

    /// Chip with the least AI cores left after carving, lowest index on ties.
    fn best_fit(node: &NpuNode, template: &VTemplate) -> Option<(u32, u32, u32)> {
        node.vchips
            .iter()
            .filter(|v| {
                template.allows(v.chip_id)
                    && !node.used.contains(v.chip_id)
                    && v.free_aicore >= template.aicore
                    && v.free_memory_mb >= template.memory_mb
            })
            .map(|v| (v.free_aicore - template.aicore, v.chip_id, v.total_aicore))
            .min()
            .map(|(leftover, chip, total)| (chip, leftover, total))
    }
}

impl VnpuStrategy for DynamicVnpu {
    fn check_node_npu_by_task(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
    ) -> Result<()> {
        requested(task, resource)?;
        let template = self
            .select_template(node.chip_type, resource)
            .ok_or_else(|| no_template(resource))?;
        if Self::best_fit(node, template).is_none() {
            return Err(SchedulerError::InsufficientVnpu {
                node: node.name.clone(),
                template: template.name.clone(),
            });
        }
        Ok(())
    }

    fn score_best_npu_nodes(
        &self,
        task: &TaskRequest,
        nodes: &[&NpuNode],
        score_map: &mut ScoreMap,
    ) -> Result<()> {
        let resource = task.vresource.unwrap_or_default();
        requested(task, &resource)?;
        for node in nodes {
            let Some(template) = self.select_template(node.chip_type, &resource) else {
                continue;
            };
            let Some((_, leftover, total)) = Self::best_fit(node, template) else {
                continue;
            };
            let score = VNPU_MAX_SCORE * (1.0 - f64::from(leftover) / f64::from(total.max(1)));
            *score_map.entry(node.name.clone()).or_insert(0.0) += score;
        }
        debug!(task = %task.name, strategy = self.name(), ?score_map, "vNPU nodes scored");
        Ok(())
    }

    fn use_annotation(
        &self,
        task: &TaskRequest,
        node: &NpuNode,
        resource: &VResource,
        template: &VTemplate,
    ) -> Option<VnpuAllocation> {
        if !template.covers(resource) {
            return None;
        }
        let (chip, _, _) = Self::best_fit(node, template)?;
        Some(VnpuAllocation::new(task, node, chip, template))
    }

    fn select_template(&self, chip_type: ChipType, resource: &VResource) -> Option<&VTemplate> {
        self.catalogue.covering(chip_type, resource)
    }

    fn commit(&self, node: &mut NpuNode, allocation: &VnpuAllocation) -> Result<()> {
        charge(node, allocation)
    }

    fn name(&self) -> &'static str {
        "dynamic"
    }
}
