//! Filesystem creation: FAT32 for the ESP, ext4 or
//! btrfs for the data partitions.

use std::path::Path;

use sysdefs::RootFileSystemType;
use trident_api::{Kind, ReportError, TridentError};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Format the ESP as FAT32 with the fixed volume label.
pub fn format_esp(device_path: &Path, label: &str) -> Result<(), TridentError> {
    Dependency::MkfsVfat
        .cmd()
        .arg("-F")
        .arg("32")
        .arg("-n")
        .arg(label)
        .arg(device_path)
        .run_and_check()
        .structured(
            Kind::Fatal,
            format!("failed to format ESP {}", device_path.display()),
        )
}

/// Format a data partition (root-A, root-B, or var) with `filesystem`.
/// Refuses outright if the corresponding `mkfs.*` tool is absent rather than
/// silently falling back to a different filesystem.
pub fn format_data(
    device_path: &Path,
    filesystem: RootFileSystemType,
) -> Result<(), TridentError> {
    let dependency = match filesystem {
        RootFileSystemType::Ext4 => Dependency::MkfsExt4,
        RootFileSystemType::Btrfs => Dependency::MkfsBtrfs,
    };

    if !dependency.exists() {
        return Err(TridentError::new(
            Kind::Precondition,
            format!(
                "{} is required to format {} as {} but was not found on PATH",
                dependency.binary_name(),
                device_path.display(),
                filesystem
            ),
        ));
    }

    dependency
        .cmd()
        .arg(device_path)
        .run_and_check()
        .structured(
            Kind::Fatal,
            format!(
                "failed to format {} as {}",
                device_path.display(),
                filesystem
            ),
        )
}
