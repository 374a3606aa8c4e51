//! Regenerate an initramfs inside a freshly extracted root.
//!
//! The image ships `/usr/lib/modules/<version>/vmlinuz*` but not a
//! host-specific initramfs: LUKS/TPM2 unlock and the `/etc` overlay hook
//! (`etc-overlay.sh`, staged by `trident::config_render`) only work once
//! dracut has woven them into an initrd built against the target root's own
//! `/usr/lib/dracut/modules.d`. `dracut` itself only knows how to inspect
//! the root it runs in, so it is invoked through `chroot` rather than
//! pointed at `root_mount` with a flag.

use std::path::Path;

use trident_api::{Kind, ReportError, TridentError};

use crate::{dependencies::Dependency, exe::RunAndCheck};

/// Build an initramfs for `kernel_version` inside `root_mount`, with
/// `extra_module` force-included, writing it to `root_mount` + `output_rel`
/// (an absolute, chroot-relative path, e.g. `/initrd.img.build`). The caller
/// picks `output_rel`; it must land on the root filesystem itself rather
/// than under a separately mounted partition such as `/boot` (the ESP) or
/// `/var`, since those are torn down independently of `root_mount`.
pub fn regenerate(
    root_mount: &Path,
    kernel_version: &str,
    extra_module: &str,
    output_rel: &str,
) -> Result<(), TridentError> {
    let output_path = root_mount.join(output_rel.trim_start_matches('/'));
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .structured(Kind::Fatal, format!("failed to create {} in target root for initramfs generation", parent.display()))?;
    }

    Dependency::Chroot
        .cmd()
        .arg(root_mount)
        .arg(Dependency::Dracut.binary_name())
        .arg("--force")
        .arg("--add")
        .arg(extra_module)
        .arg(output_rel)
        .arg(kernel_version)
        .run_and_check()
        .structured(Kind::Fatal, format!("dracut failed to build initramfs for kernel {kernel_version}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regenerate_creates_output_parent_directory_before_invoking_chroot() {
        let dir = tempfile::tempdir().unwrap();
        // dracut/chroot are not expected to exist in the test sandbox; we only
        // assert the precondition this function guarantees before it shells out.
        let _ = regenerate(dir.path(), "6.6.0-nbc", "nbc-etc-overlay", "/staging/initrd.img.build");
        assert!(dir.path().join("staging").is_dir());
    }
}
