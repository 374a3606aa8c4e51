//! Loop device attachment for the `--via-loopback` install target.

use std::path::{Path, PathBuf};

use trident_api::{Kind, ReportError, TridentError};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Attach `image_path` as a partition-scanned loop device and return the
/// assigned `/dev/loopN` path.
pub fn attach(image_path: &Path) -> Result<PathBuf, TridentError> {
    let output = Dependency::Losetup
        .cmd()
        .arg("--find")
        .arg("--partscan")
        .arg("--show")
        .arg(image_path)
        .output_and_check()
        .structured(
            Kind::Precondition,
            format!("failed to attach loop device for {}", image_path.display()),
        )?;
    Ok(PathBuf::from(output.trim()))
}

pub fn detach(loop_device: &Path) -> Result<(), TridentError> {
    Dependency::Losetup
        .cmd()
        .arg("--detach")
        .arg(loop_device)
        .run_and_check()
        .structured(
            Kind::Transient,
            format!("failed to detach loop device {}", loop_device.display()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_trims_trailing_newline_from_losetup_output() {
        let raw = "/dev/loop0\n";
        assert_eq!(PathBuf::from(raw.trim()), PathBuf::from("/dev/loop0"));
    }
}
