use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// Filesystem types the orchestrator can create and mount on a root/var
/// partition. The ESP is always `Vfat` and is not representable here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
pub enum RootFileSystemType {
    Ext4,
    Btrfs,
}

impl RootFileSystemType {
    /// Name passed to `mkfs --type`.
    pub fn mkfs_name(&self) -> &'static str {
        match self {
            RootFileSystemType::Ext4 => "ext4",
            RootFileSystemType::Btrfs => "btrfs",
        }
    }

    /// Name used on the kernel command line (`rootfstype=`) and in fstab.
    pub fn fstab_name(&self) -> &'static str {
        self.mkfs_name()
    }
}

impl std::fmt::Display for RootFileSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mkfs_name())
    }
}

impl std::str::FromStr for RootFileSystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ext4" => Ok(RootFileSystemType::Ext4),
            "btrfs" => Ok(RootFileSystemType::Btrfs),
            other => Err(format!("unsupported root filesystem type '{other}'")),
        }
    }
}
