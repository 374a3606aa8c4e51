//! Finds the kernel an extracted image ships and stages it, together with a
//! freshly built initramfs, onto the ESP where `grub.cfg`/systemd-boot
//! entries expect `/vmlinuz` and `/initrd.img` to live.
//!
//! `extractor::verify` already guarantees some
//! `/usr/lib/modules/<version>/vmlinuz*` is present and non-empty; this
//! module picks the newest such version (images are not expected to ship
//! more than one, but installs from an image built with leftover module
//! directories should still boot the one actually meant to run) and copies
//! it next to the dracut-built initrd.

use std::{fs, path::Path};

use trident_api::{
    constants::{ESP_INITRD_NAME, ESP_KERNEL_NAME, ETC_OVERLAY_DRACUT_MODULE},
    Kind, ReportError, TridentError,
};

use osutils::dracut;

/// A kernel version directory found under `/usr/lib/modules`, with the path
/// to its `vmlinuz*` file.
struct KernelVersion {
    version: String,
    vmlinuz: std::path::PathBuf,
}

/// Find the lexicographically greatest `/usr/lib/modules/<version>` with a
/// non-empty `vmlinuz*` file. Kernel version strings sort correctly as
/// plain strings for the common case (same upstream major/minor with an
/// incrementing build number); ties are broken arbitrarily.
fn find_kernel(root_mount: &Path) -> Result<KernelVersion, TridentError> {
    let modules_dir = root_mount.join("usr/lib/modules");
    let mut found: Vec<KernelVersion> = Vec::new();

    let versions = fs::read_dir(&modules_dir)
        .structured(Kind::Corruption, format!("failed to read {}", modules_dir.display()))?;
    for version_entry in versions {
        let version_entry = version_entry.structured(Kind::Corruption, "failed to read kernel module directory entry")?;
        let version_path = version_entry.path();
        if !version_path.is_dir() {
            continue;
        }
        let Ok(files) = fs::read_dir(&version_path) else { continue };
        for file in files.flatten() {
            let name = file.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(ESP_KERNEL_NAME) {
                continue;
            }
            if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
                continue;
            }
            found.push(KernelVersion {
                version: version_entry.file_name().to_string_lossy().into_owned(),
                vmlinuz: file.path(),
            });
        }
    }

    found.sort_by(|a, b| a.version.cmp(&b.version));
    found
        .pop()
        .structured(Kind::Corruption, "no non-empty /usr/lib/modules/<version>/vmlinuz* found in extracted image")
}

/// Copy the image's kernel onto the ESP and build+copy a matching
/// initramfs, with the `/etc` overlay dracut module force-included.
/// Must run after [`super::config_render::install_etc_overlay_module`] has
/// staged the module source into `root_mount`.
pub fn stage_boot_payload(root_mount: &Path, esp_mount: &Path) -> Result<(), TridentError> {
    let kernel = find_kernel(root_mount)?;

    let esp_kernel_path = esp_mount.join(ESP_KERNEL_NAME);
    fs::copy(&kernel.vmlinuz, &esp_kernel_path).structured(
        Kind::Fatal,
        format!("failed to copy {} to {}", kernel.vmlinuz.display(), esp_kernel_path.display()),
    )?;

    // Built outside `/boot`: that's the ESP mount point, and a build output
    // path under it would alias the copy destination below, since `chroot
    // root_mount dracut ... /boot/x` and `esp_mount.join("x")` are the same
    // file on disk once the ESP is mounted at `root_mount/boot`.
    const BUILD_REL_PATH: &str = "/nbc-initrd.build";
    dracut::regenerate(root_mount, &kernel.version, ETC_OVERLAY_DRACUT_MODULE, BUILD_REL_PATH)?;
    let built_initrd = root_mount.join(BUILD_REL_PATH.trim_start_matches('/'));
    let esp_initrd_path = esp_mount.join(ESP_INITRD_NAME);
    fs::copy(&built_initrd, &esp_initrd_path).structured(
        Kind::Fatal,
        format!("failed to copy {} to {}", built_initrd.display(), esp_initrd_path.display()),
    )?;
    fs::remove_file(&built_initrd)
        .structured(Kind::Fatal, format!("failed to remove build artifact {}", built_initrd.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_kernel_dir(root: &Path, version: &str, vmlinuz_bytes: &[u8]) {
        let dir = root.join("usr/lib/modules").join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vmlinuz"), vmlinuz_bytes).unwrap();
    }

    #[test]
    fn find_kernel_picks_the_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        make_kernel_dir(dir.path(), "6.6.0-1", b"old");
        make_kernel_dir(dir.path(), "6.6.0-2", b"new");
        let found = find_kernel(dir.path()).unwrap();
        assert_eq!(found.version, "6.6.0-2");
        assert_eq!(fs::read(&found.vmlinuz).unwrap(), b"new");
    }

    #[test]
    fn find_kernel_skips_empty_vmlinuz() {
        let dir = tempfile::tempdir().unwrap();
        make_kernel_dir(dir.path(), "6.6.0-1", b"");
        assert!(find_kernel(dir.path()).is_err());
    }

    #[test]
    fn find_kernel_fails_with_no_modules_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_kernel(dir.path()).is_err());
    }
}
