//! [`Device`] — the target block device, identified by a stable path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Ssd,
    Rotational,
    Loop,
    Nvme,
    Mmc,
}

impl DeviceKind {
    /// Whether partition nodes for this device take the `p{N}` suffix form
    /// rather than `{N}`.
    pub fn uses_partition_suffix(&self) -> bool {
        matches!(self, DeviceKind::Loop | DeviceKind::Nvme | DeviceKind::Mmc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Canonical, stable path — prefer a `/dev/disk/by-id/...` entry over a
    /// raw `/dev/sdX`/`/dev/nvmeXnY` path wherever this is persisted or
    /// placed on the kernel command line.
    pub path: PathBuf,
    pub kind: DeviceKind,
    pub size_bytes: u64,
    pub rotational: bool,
}

impl Device {
    /// Base name of the device node, e.g. `nvme0n1` for
    /// `/dev/nvme0n1`.
    pub fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Compute the partition node path for partition number `n` on this
    /// device: `p{N}` when the base name begins with `nvme`, `mmcblk`, or
    /// `loop`; `{N}` otherwise.
    pub fn partition_node(&self, n: u32) -> PathBuf {
        partition_node_for(&self.path, n)
    }
}

/// Free function version of [`Device::partition_node`], usable before a
/// full [`Device`] has been probed (e.g. while only a raw path is known).
pub fn partition_node_for(device_path: &Path, n: u32) -> PathBuf {
    let base = device_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = if base.starts_with("nvme") || base.starts_with("mmcblk") || base.starts_with("loop")
    {
        format!("p{n}")
    } else {
        format!("{n}")
    };
    let mut node = device_path.as_os_str().to_owned();
    node.push(suffix);
    PathBuf::from(node)
}
