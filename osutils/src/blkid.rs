//! Filesystem UUID lookup via `blkid`.

use std::path::Path;

use trident_api::{Kind, ReportError, TridentError};
use uuid::Uuid;

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Read the filesystem UUID of an already-formatted partition.
pub fn filesystem_uuid(device_path: &Path) -> Result<Uuid, TridentError> {
    let raw = Dependency::Blkid
        .cmd()
        .arg("-s")
        .arg("UUID")
        .arg("-o")
        .arg("value")
        .arg(device_path)
        .output_and_check()
        .structured(
            Kind::Fatal,
            format!("failed to read filesystem UUID of {}", device_path.display()),
        )?;

    Uuid::parse_str(raw.trim()).structured(
        Kind::Corruption,
        format!(
            "blkid returned an unparseable UUID for {}",
            device_path.display()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_output() {
        let err = Uuid::parse_str("not-a-uuid");
        assert!(err.is_err());
    }
}
