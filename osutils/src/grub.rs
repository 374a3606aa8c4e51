//! GRUB installation and config generation.
//!
//! `grub-install` is invoked directly; `grub.cfg` is rendered from a `tera`
//! template rather than built with string concatenation, since this module
//! generates the whole file fresh rather than editing one in place.

use std::path::Path;

use sysdefs::SystemArchitecture;
use tera::{Context as TeraContext, Tera};
use trident_api::{Kind, ReportError, TridentError};

use crate::{dependencies::Dependency, exe::RunAndCheck};

const GRUB_CFG_TEMPLATE: &str = r#"set default=0
set timeout=3

menuentry "nbc" {
    search --no-floppy --fs-uuid --set=root {{ root_fs_uuid }}
    linux /vmlinuz root={{ root_device }} {{ cmdline }}
    initrd /initrd.img
}
"#;

/// Install the GRUB bootloader image onto the ESP. `esp_mount`
/// is the mounted ESP root; `target_arch` selects the `--target` GRUB uses
/// to pick its platform image.
pub fn install(esp_mount: &Path, target_arch: SystemArchitecture) -> Result<(), TridentError> {
    Dependency::GrubInstall
        .cmd()
        .arg("--target")
        .arg(target_arch.grub_target())
        .arg("--efi-directory")
        .arg(esp_mount)
        .arg("--bootloader-id")
        .arg("nbc")
        .arg("--removable")
        .run_and_check()
        .structured(Kind::Fatal, "grub-install failed")
}

/// Render `grub.cfg` for the given root UUID, root device, and kernel
/// command line, and write it to `destination`.
pub fn render_config(
    root_fs_uuid: &str,
    root_device: &str,
    cmdline: &str,
    destination: &Path,
) -> Result<(), TridentError> {
    let rendered = render_config_string(root_fs_uuid, root_device, cmdline)?;
    std::fs::write(destination, rendered).structured(Kind::Fatal, "failed to write grub.cfg")
}

fn render_config_string(
    root_fs_uuid: &str,
    root_device: &str,
    cmdline: &str,
) -> Result<String, TridentError> {
    let mut tera = Tera::default();
    tera.add_raw_template("grub.cfg", GRUB_CFG_TEMPLATE)
        .structured(Kind::Fatal, "invalid grub.cfg template")?;

    let mut ctx = TeraContext::new();
    ctx.insert("root_fs_uuid", root_fs_uuid);
    ctx.insert("root_device", root_device);
    ctx.insert("cmdline", cmdline);

    tera.render("grub.cfg", &ctx)
        .structured(Kind::Fatal, "failed to render grub.cfg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_root_uuid_device_and_cmdline_into_config() {
        let rendered =
            render_config_string("abcd-1234", "/dev/mapper/root1", "quiet splash").unwrap();
        assert!(rendered.contains("abcd-1234"));
        assert!(rendered.contains("/dev/mapper/root1"));
        assert!(rendered.contains("quiet splash"));
    }
}
