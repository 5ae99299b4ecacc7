//! Accelerator chip families and their per-server limits.

use serde::{Deserialize, Serialize};

/// Largest chip count any supported server carries.
pub const MAX_CHIPS_PER_SERVER: usize = 16;

/// Accelerator chip family installed in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChipType {
    /// Training chip, eight per server.
    TrainX8,
    /// Training chip, sixteen per server.
    TrainX16,
    /// Inference chip, eight per server.
    InferX8,
}

impl ChipType {
    /// Maximum number of chips a server of this family can hold.
    #[must_use]
    pub const fn max_chips(self) -> usize {
        match self {
            Self::TrainX8 | Self::InferX8 => 8,
            Self::TrainX16 => MAX_CHIPS_PER_SERVER,
        }
    }

    /// AI cores available on one physical chip.
    #[must_use]
    pub const fn aicore_per_chip(self) -> u32 {
        match self {
            Self::TrainX8 => 32,
            Self::TrainX16 => 24,
            Self::InferX8 => 8,
        }
    }

    /// On-chip memory of one physical chip, in MB.
    #[must_use]
    pub const fn memory_mb_per_chip(self) -> u64 {
        match self {
            Self::TrainX8 => 32_768,
            Self::TrainX16 => 65_536,
            Self::InferX8 => 24_576,
        }
    }

    /// Returns the chip family name as written in inventory data.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TrainX8 => "train-x8",
            Self::TrainX16 => "train-x16",
            Self::InferX8 => "infer-x8",
        }
    }
}

impl std::fmt::Display for ChipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn no_family_exceeds_server_maximum() {
        for chip in [ChipType::TrainX8, ChipType::TrainX16, ChipType::InferX8] {
            assert!(chip.max_chips() <= MAX_CHIPS_PER_SERVER);
        }
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&ChipType::TrainX16).unwrap();
        assert_eq!(json, "\"train-x16\"");
        assert_eq!(ChipType::TrainX16.to_string(), "train-x16");
    }
}
