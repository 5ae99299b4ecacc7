//! Annotation and label keys shared by the scheduler and the rank-table builder.

/// Job annotation naming the placement policy.
pub const SCHEDULE_POLICY: &str = "meridian.io/schedule-policy";
/// Policy whose jobs always get a super-pod-aware rank table.
pub const SUPER_POD_POLICY: &str = "chip2-node16-sp";
/// Job annotation giving the super-pod block size in chips.
pub const SUPER_POD_BLOCK: &str = "meridian.io/sp-block";
/// Job label selecting soft or hard super-pod affinity.
pub const SUPER_POD_AFFINITY: &str = "meridian.io/super-pod-affinity";
/// Soft super-pod affinity.
pub const SOFT_STRATEGY: &str = "soft";
/// Hard super-pod affinity.
pub const HARD_STRATEGY: &str = "hard";
/// Job label naming the accelerator module type.
pub const ACCELERATOR_TYPE: &str = "meridian.io/accelerator-type";
/// Accelerator type of super-pod modules.
pub const SUPER_POD_ACCELERATOR: &str = "module-x16-super-pod";
/// Job annotation requesting a specific rank-table version.
pub const RANKTABLE_VERSION: &str = "meridian.io/ranktable-version";
/// Job label enabling rack (Tor) affinity.
pub const TOR_AFFINITY: &str = "meridian.io/tor-affinity";
/// Tor affinity value meaning "not rack-affine".
pub const TOR_AFFINITY_NONE: &str = "null";

/// Pod annotation carrying the pod's rank index.
pub const POD_RANK_INDEX: &str = "meridian.io/rank-index";
/// Pod annotation carrying the pod's super-pod rank.
pub const POD_SUPER_POD_RANK: &str = "meridian.io/super-pod-rank";
/// Pod annotation carrying the whole chips chosen for the pod.
pub const POD_NPU_CHIPS: &str = "meridian.io/npu-chips";
/// Pod annotation carrying the virtual chip chosen for the pod.
pub const POD_NPU_CORE: &str = "meridian.io/npu-core";
