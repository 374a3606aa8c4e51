//! Configuration rendering for a freshly extracted root. Every
//! function here writes into an already-mounted target root; none of them
//! touch the running host's own `/etc`.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
};

use sysdefs::RootFileSystemType;
use trident_api::{
    constants::{ETC_OVERLAY_DIR, ETC_OVERLAY_DRACUT_MODULE},
    CryptoEnvelope, Kind, ReportError, TridentError,
};
use uuid::Uuid;

use osutils::{dependencies::Dependency, exe::RunAndCheck};

/// Render `/etc/fstab` for the extracted root. Root and `/var` are mounted
/// by the initramfs from the kernel command line, so the only
/// entry fstab itself needs is the ESP, mounted at `/boot/efi`.
pub fn render_fstab(esp_fs_uuid: &Uuid) -> String {
    format!(
        "# /etc/fstab: generated at install/update time.\n\
         UUID={esp_fs_uuid} /boot/efi vfat umask=0077 0 2\n"
    )
}

pub fn write_fstab(root_mount: &Path, esp_fs_uuid: &Uuid) -> Result<(), TridentError> {
    let path = root_mount.join("etc/fstab");
    fs::write(&path, render_fstab(esp_fs_uuid))
        .structured(Kind::Fatal, format!("failed to write {}", path.display()))
}

/// Render `/etc/crypttab`: one line per open envelope.
pub fn render_crypttab(envelopes: &[CryptoEnvelope], tpm2_enrolled: bool) -> String {
    let mut out = String::from("# /etc/crypttab: generated at install/update time.\n");
    for envelope in envelopes {
        out.push_str(&envelope.crypttab_line(tpm2_enrolled));
        out.push('\n');
    }
    out
}

pub fn write_crypttab(
    root_mount: &Path,
    envelopes: &[CryptoEnvelope],
    tpm2_enrolled: bool,
) -> Result<(), TridentError> {
    if envelopes.is_empty() {
        return Ok(());
    }
    let path = root_mount.join("etc/crypttab");
    fs::write(&path, render_crypttab(envelopes, tpm2_enrolled))
        .structured(Kind::Fatal, format!("failed to write {}", path.display()))
}

/// Stamp a fresh `/etc/machine-id` (128-bit lowercase hex, no dashes, per
/// the systemd machine-id format) so every install/update target gets a
/// distinct machine identity.
pub fn write_machine_id(root_mount: &Path) -> Result<(), TridentError> {
    let id = Uuid::new_v4().simple().to_string();
    let path = root_mount.join("etc/machine-id");
    fs::write(&path, format!("{id}\n"))
        .structured(Kind::Fatal, format!("failed to write {}", path.display()))
}

/// Create the upper/work directories the `/etc` overlay mounts against.
/// `var_mount` is the mounted `var` partition, at `<root_mount>/var`.
pub fn seed_etc_overlay(var_mount: &Path) -> Result<(), TridentError> {
    let overlay_root = var_mount.join(ETC_OVERLAY_DIR.trim_start_matches("/var/"));
    for sub in ["upper", "work"] {
        let dir = overlay_root.join(sub);
        fs::create_dir_all(&dir)
            .structured(Kind::Fatal, format!("failed to create {}", dir.display()))?;
    }
    Ok(())
}

const DRACUT_MODULE_SETUP: &str = r#"#!/bin/bash
check() {
    return 0
}

depends() {
    echo rootfs-block
}

install() {
    inst_hook pre-mount 50 "$moddir/etc-overlay.sh"
    inst_multiple mount mkdir
}
"#;

const DRACUT_MODULE_HOOK: &str = r#"#!/bin/bash
# Assembles /etc as an overlay: lower = the image's shipped /etc (moved
# aside to /etc.lower on first boot), upper/work = /var/lib/nbc/etc-overlay.
# Only runs when rd.etc.overlay=1 is present on the kernel command line.

. /lib/dracut-lib.sh

getarg rd.etc.overlay=1 >/dev/null || exit 0

root_mount="$NEWROOT"
etc_dir="$root_mount/etc"
lower_dir="$root_mount/etc.lower"
upper_dir="$root_mount/var/lib/nbc/etc-overlay/upper"
work_dir="$root_mount/var/lib/nbc/etc-overlay/work"

if [ ! -d "$lower_dir" ]; then
    mv "$etc_dir" "$lower_dir"
    mkdir -p "$etc_dir"
fi

mount -t overlay overlay -o "lowerdir=$lower_dir,upperdir=$upper_dir,workdir=$work_dir" "$etc_dir"
"#;

/// Install the initramfs hook module that assembles the `/etc` overlay on
/// boot. Dracut module numbering (`50`) places it after the root
/// filesystem is mounted but before the real init is exec'd.
pub fn install_etc_overlay_module(root_mount: &Path) -> Result<(), TridentError> {
    let module_dir = root_mount.join("usr/lib/dracut/modules.d").join(format!("50{ETC_OVERLAY_DRACUT_MODULE}"));
    fs::create_dir_all(&module_dir)
        .structured(Kind::Fatal, "failed to create dracut module directory")?;

    write_executable(&module_dir.join("module-setup.sh"), DRACUT_MODULE_SETUP)?;
    write_executable(&module_dir.join("etc-overlay.sh"), DRACUT_MODULE_HOOK)?;
    Ok(())
}

fn write_executable(path: &Path, contents: &str) -> Result<(), TridentError> {
    fs::write(path, contents)
        .structured(Kind::Fatal, format!("failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .structured(Kind::Fatal, format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Set the root password inside the extracted root via `chpasswd --root`
/// set root password via chpasswd on stdin"). The
/// password is piped to the child's stdin, never passed as an argument.
pub fn set_root_password(root_mount: &Path, password: &str) -> Result<(), TridentError> {
    let mut child = Dependency::Chpasswd
        .cmd()
        .arg("--root")
        .arg(root_mount)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .structured(Kind::Fatal, "failed to spawn chpasswd")?;

    {
        let mut stdin = child
            .stdin
            .take()
            .structured(Kind::Fatal, "chpasswd child has no stdin pipe")?;
        stdin
            .write_all(format!("root:{password}\n").as_bytes())
            .structured(Kind::Fatal, "failed to write password to chpasswd")?;
    }

    let output = child
        .wait_with_output()
        .structured(Kind::Fatal, "failed to wait on chpasswd")?;
    if !output.status.success() {
        return Err(TridentError::new(
            Kind::Fatal,
            format!(
                "chpasswd failed: {}",
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// Path fstab/crypttab helpers write under, given a mounted root.
pub fn root_relative(root_mount: &Path, rel: &str) -> PathBuf {
    root_mount.join(rel)
}

/// Pick the mkfs-equivalent fstab type string for `fs`, exposed here so
/// callers rendering fstab entries for root/var (when they choose to, on
/// top of the mandatory cmdline-driven mounts) stay consistent with
/// [`RootFileSystemType::fstab_name`].
pub fn fstab_type_name(fs: RootFileSystemType) -> &'static str {
    fs.fstab_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trident_api::PartitionRole;

    #[test]
    fn fstab_contains_esp_uuid_and_mount_point() {
        let uuid = Uuid::nil();
        let rendered = render_fstab(&uuid);
        assert!(rendered.contains("/boot/efi"));
        assert!(rendered.contains("00000000-0000-0000-0000-000000000000"));
        assert!(rendered.contains("vfat"));
    }

    #[test]
    fn crypttab_is_empty_string_with_no_envelopes() {
        assert_eq!(render_crypttab(&[], false), "# /etc/crypttab: generated at install/update time.\n");
    }

    #[test]
    fn crypttab_has_one_line_per_envelope() {
        let envelopes = vec![
            CryptoEnvelope {
                partition: PartitionRole::RootA,
                luks_uuid: Uuid::nil(),
                mapper_name: "root1".into(),
            },
            CryptoEnvelope {
                partition: PartitionRole::Var,
                luks_uuid: Uuid::nil(),
                mapper_name: "var".into(),
            },
        ];
        let rendered = render_crypttab(&envelopes, true);
        assert_eq!(rendered.lines().count(), 3); // header + 2 entries
        assert!(rendered.contains("root1"));
        assert!(rendered.contains("var"));
        assert!(rendered.contains("tpm2-device=auto"));
    }

    #[test]
    fn seed_etc_overlay_creates_upper_and_work_dirs() {
        let dir = tempfile::tempdir().unwrap();
        seed_etc_overlay(dir.path()).unwrap();
        assert!(dir.path().join("lib/nbc/etc-overlay/upper").is_dir());
        assert!(dir.path().join("lib/nbc/etc-overlay/work").is_dir());
    }

    #[test]
    fn install_etc_overlay_module_writes_executable_scripts() {
        let dir = tempfile::tempdir().unwrap();
        install_etc_overlay_module(dir.path()).unwrap();
        let module_dir = dir.path().join("usr/lib/dracut/modules.d/50nbc-etc-overlay");
        assert!(module_dir.join("module-setup.sh").is_file());
        assert!(module_dir.join("etc-overlay.sh").is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(module_dir.join("etc-overlay.sh"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[test]
    fn machine_id_is_32_lowercase_hex_characters() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("etc")).unwrap();
        write_machine_id(dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("etc/machine-id")).unwrap();
        let trimmed = contents.trim();
        assert_eq!(trimmed.len(), 32);
        assert!(trimmed.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
