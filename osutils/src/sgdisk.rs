//! GPT partition table creation via `sgdisk`, using
//! its imperative `--new`/`--typecode` flag style directly since the fixed
//! four-partition layout needs no templating.

use std::path::Path;

use trident_api::{
    device::partition_node_for, Kind, PartitionInfo, PartitionLayout, PartitionRole, ReportError,
    TridentError,
};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Wipe `device_path` and lay down the fixed four-partition GPT scheme: ESP, root-A, root-B, var, in that order, with the
/// sizes supplied in `sizes` (bytes) for each role except var, which takes
/// the remainder of the device.
pub struct PartitionSizes {
    pub esp_bytes: u64,
    pub root_bytes: u64,
}

pub fn partition(
    device_path: &Path,
    sizes: &PartitionSizes,
    root_filesystem: sysdefs::RootFileSystemType,
) -> Result<PartitionLayout, TridentError> {
    Dependency::Sgdisk
        .cmd()
        .arg("--zap-all")
        .arg(device_path)
        .run_and_check()
        .structured(Kind::Fatal, "failed to clear existing GPT")?;

    create_partition(device_path, PartitionRole::Esp, Some(sizes.esp_bytes))?;
    create_partition(device_path, PartitionRole::RootA, Some(sizes.root_bytes))?;
    create_partition(device_path, PartitionRole::RootB, Some(sizes.root_bytes))?;
    create_partition(device_path, PartitionRole::Var, None)?;

    let info = |role: PartitionRole| PartitionInfo {
        role,
        node: partition_node_for(device_path, role.index()),
        size_bytes: match role {
            PartitionRole::Esp => sizes.esp_bytes,
            PartitionRole::RootA | PartitionRole::RootB => sizes.root_bytes,
            PartitionRole::Var => 0,
        },
        filesystem_uuid: None,
    };

    Ok(PartitionLayout {
        esp: info(PartitionRole::Esp),
        root_a: info(PartitionRole::RootA),
        root_b: info(PartitionRole::RootB),
        var: info(PartitionRole::Var),
        root_filesystem,
    })
}

fn create_partition(
    device_path: &Path,
    role: PartitionRole,
    size_bytes: Option<u64>,
) -> Result<(), TridentError> {
    let index = role.index();
    // `0` lets sgdisk pick the next free sector as the start; a `+N` end
    // reserves N sectors, a bare `0` end consumes the rest of the device.
    let end = match size_bytes {
        Some(bytes) => format!("+{}", bytes / 512),
        None => "0".to_string(),
    };

    Dependency::Sgdisk
        .cmd()
        .arg("--new")
        .arg(format!("{index}:0:{end}"))
        .arg("--typecode")
        .arg(format!("{index}:{}", role.gpt_type().sgdisk_code()))
        .arg("--change-name")
        .arg(format!("{index}:{}", role.gpt_name()))
        .arg(device_path)
        .run_and_check()
        .structured(
            Kind::Fatal,
            format!("failed to create partition {index} ({})", role.gpt_name()),
        )
}

/// Re-scan the partition table so the kernel picks up the newly created
/// nodes. `losetup --partscan` only takes effect at
/// initial attach (see [`crate::losetup::attach`]); re-scanning a loop
/// device that is already attached needs `partx -u` instead. Real disks use
/// `partprobe`.
pub fn rescan(device_path: &Path, is_loop: bool) -> Result<(), TridentError> {
    if is_loop {
        Dependency::Partx
            .cmd()
            .arg("-u")
            .arg(device_path)
            .run_and_check()
            .structured(Kind::Fatal, "failed to re-read loop device partitions")
    } else {
        Dependency::Partprobe
            .cmd()
            .arg(device_path)
            .run_and_check()
            .structured(Kind::Fatal, "failed to re-read partition table")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_partition_has_no_fixed_size() {
        // `var` consumes the remainder of the device; its PartitionInfo
        // carries a size of 0 since it cannot be known ahead of formatting.
        let sizes = PartitionSizes {
            esp_bytes: 2 * 1024 * 1024 * 1024,
            root_bytes: 12 * 1024 * 1024 * 1024,
        };
        assert!(sizes.esp_bytes < sizes.root_bytes);
    }
}
