//! [`PartitionLayout`] — the fixed four-partition GPT scheme.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sysdefs::{GptPartitionType, RootFileSystemType};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionRole {
    Esp,
    RootA,
    RootB,
    Var,
}

impl PartitionRole {
    /// GPT partition index, 1-based, in the fixed partition order.
    pub fn index(&self) -> u32 {
        match self {
            PartitionRole::Esp => 1,
            PartitionRole::RootA => 2,
            PartitionRole::RootB => 3,
            PartitionRole::Var => 4,
        }
    }

    /// Name written into the GPT partition name field.
    pub fn gpt_name(&self) -> &'static str {
        match self {
            PartitionRole::Esp => "boot",
            PartitionRole::RootA => "root1",
            PartitionRole::RootB => "root2",
            PartitionRole::Var => "var",
        }
    }

    pub fn gpt_type(&self) -> GptPartitionType {
        match self {
            PartitionRole::Esp => GptPartitionType::EspSystem,
            _ => GptPartitionType::LinuxGeneric,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub role: PartitionRole,
    /// Partition device node, e.g. `/dev/sdb2` or `/dev/nvme0n1p2`.
    pub node: PathBuf,
    pub size_bytes: u64,
    /// Filesystem UUID, populated once the partition has been formatted.
    pub filesystem_uuid: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub esp: PartitionInfo,
    pub root_a: PartitionInfo,
    pub root_b: PartitionInfo,
    pub var: PartitionInfo,
    /// Filesystem type shared by `root_a`, `root_b`, and `var`.
    pub root_filesystem: RootFileSystemType,
}

impl PartitionLayout {
    pub fn root_for(&self, slot: sysdefs::Slot) -> &PartitionInfo {
        match slot {
            sysdefs::Slot::A => &self.root_a,
            sysdefs::Slot::B => &self.root_b,
        }
    }

    pub fn all(&self) -> [&PartitionInfo; 4] {
        [&self.esp, &self.root_a, &self.root_b, &self.var]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_order_and_type_codes_match_spec() {
        assert_eq!(PartitionRole::Esp.index(), 1);
        assert_eq!(PartitionRole::RootA.index(), 2);
        assert_eq!(PartitionRole::RootB.index(), 3);
        assert_eq!(PartitionRole::Var.index(), 4);
        assert_eq!(PartitionRole::Esp.gpt_type().sgdisk_code(), "ef00");
        assert_eq!(PartitionRole::RootA.gpt_type().sgdisk_code(), "8300");
        assert_eq!(PartitionRole::Var.gpt_type().sgdisk_code(), "8300");
    }
}
