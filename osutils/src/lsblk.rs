//! Block device probing via `lsblk --json`,
//! parsing down to the handful of fields the orchestrator actually needs:
//! kind, size, and rotational flag.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use trident_api::{Device, DeviceKind};

use crate::dependencies::Dependency;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    size: u64,
    #[serde(rename = "rota")]
    rotational: bool,
    #[serde(default)]
    tran: Option<String>,
}

/// Probe `device_path` and classify it into a [`Device`].
///
/// Classification order: `nvme*` and `mmcblk*` names are recognized from the
/// base name directly (their transport is not reliably reported by `lsblk`
/// for NVMe), everything else falls back to the `TRAN`/`ROTA` columns.
pub fn probe(device_path: &Path) -> Result<Device, trident_api::TridentError> {
    use trident_api::{Kind, ReportError};

    let base = device_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let output = Dependency::Lsblk
        .cmd()
        .arg("--json")
        .arg("--bytes")
        .arg("--output")
        .arg("NAME,SIZE,ROTA,TRAN")
        .arg(device_path)
        .output()
        .structured(Kind::Precondition, "failed to run lsblk")?;

    if !output.status.success() {
        return Err(trident_api::TridentError::new(
            Kind::Precondition,
            format!(
                "lsblk exited with {:?} for device {}",
                output.status.code(),
                device_path.display()
            ),
        ));
    }

    let parsed: LsblkOutput = serde_json::from_slice(&output.stdout)
        .structured(Kind::Corruption, "failed to parse lsblk JSON output")?;

    let entry = parsed
        .blockdevices
        .into_iter()
        .next()
        .structured(Kind::Precondition, "lsblk returned no devices")?;

    let kind = if base.starts_with("nvme") {
        DeviceKind::Nvme
    } else if base.starts_with("mmcblk") {
        DeviceKind::Mmc
    } else if base.starts_with("loop") {
        DeviceKind::Loop
    } else if entry.rotational {
        DeviceKind::Rotational
    } else {
        DeviceKind::Ssd
    };

    let _ = entry.tran;

    Ok(Device {
        path: device_path.to_path_buf(),
        kind,
        size_bytes: entry.size,
        rotational: entry.rotational,
    })
}

/// Base name of a device path, e.g. `nvme0n1` for `/dev/nvme0n1`.
pub fn base_name(device_path: &Path) -> String {
    device_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn resolve(path_str: &str) -> PathBuf {
    PathBuf::from(path_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_name_strips_directory() {
        assert_eq!(base_name(Path::new("/dev/nvme0n1")), "nvme0n1");
        assert_eq!(base_name(Path::new("/dev/sdb")), "sdb");
    }
}
