//! Bootloader orchestration: dispatches between GRUB and
//! systemd-boot, stages the Secure Boot shim chain when requested, and
//! registers the firmware boot entry. Every step below is a thin sequencing
//! layer over the `osutils` wrappers that do the actual work — this module
//! owns none of the file formats itself.

use std::path::{Path, PathBuf};

use sysdefs::{SystemArchitecture, Slot};
use trident_api::{BootloaderKind, Device, Kind, PartitionRole, ReportError, TridentError};

use osutils::{efibootmgr, grub, secureboot, systemd_boot};

/// Owned paths to a shim chain staged inside the extracted image, found by
/// [`probe_image`]. Borrowed into a [`ShimSources`] at the call site.
pub struct ShimSourcePaths {
    pub shim: PathBuf,
    pub real_loader: PathBuf,
    pub mok_manager: PathBuf,
}

/// Inspect the extracted root for which bootloader it ships and whether it
/// carries a Secure Boot shim chain. Neither is a CLI flag — both are properties of the image
/// itself, discovered the same way at install and at update time so a
/// single image always gets the same bootloader treatment.
///
/// Returns the bootloader kind, the path to the main loader binary itself
/// (`grub<arch>.efi`/`systemd-boot<arch>.efi`) when present regardless of
/// whether a full shim chain is staged, and the full shim chain when all
/// three of its binaries are present.
pub fn probe_image(
    root_mount: &Path,
    arch: SystemArchitecture,
) -> (BootloaderKind, Option<PathBuf>, Option<ShimSourcePaths>) {
    let systemd_boot_loader = root_mount.join("usr/lib/systemd/boot/efi/systemd-bootx64.efi");
    let kind = if systemd_boot_loader.is_file() {
        BootloaderKind::SystemdBoot
    } else {
        BootloaderKind::Grub
    };

    let names = secureboot::shim_chain_names(arch);
    let shim_dir = root_mount.join("usr/lib/shim");
    let shim = shim_dir.join(format!("shim{}.efi", arch_suffix(arch)));
    let mok_manager = shim_dir.join(names.mok_manager);
    let real_loader = match kind {
        BootloaderKind::Grub => root_mount
            .join("usr/lib/grub")
            .join(format!("{}-efi", arch_target(arch)))
            .join(names.real_loader),
        BootloaderKind::SystemdBoot => systemd_boot_loader.clone(),
    };

    let loader_source = real_loader.is_file().then(|| real_loader.clone());
    let shim_chain = if shim.is_file() && real_loader.is_file() && mok_manager.is_file() {
        Some(ShimSourcePaths { shim, real_loader, mok_manager })
    } else {
        None
    };
    (kind, loader_source, shim_chain)
}

fn arch_suffix(arch: SystemArchitecture) -> &'static str {
    match arch {
        SystemArchitecture::Amd64 => "x64",
        SystemArchitecture::Aarch64 => "aa64",
    }
}

fn arch_target(arch: SystemArchitecture) -> &'static str {
    match arch {
        SystemArchitecture::Amd64 => "x86_64",
        SystemArchitecture::Aarch64 => "arm64",
    }
}

/// Everything the bootloader step needs about the slot it is configuring.
/// `shim_sources` is `Some` only when Secure Boot is enabled. `loader_source`
/// is the main systemd-boot loader binary as staged in the extracted image;
/// only consulted for [`BootloaderKind::SystemdBoot`] without a shim chain,
/// where nothing else copies it onto the ESP.
pub struct BootloaderContext<'a> {
    pub kind: BootloaderKind,
    pub arch: SystemArchitecture,
    pub esp_mount: &'a Path,
    pub esp_device: &'a Device,
    pub slot: Slot,
    pub root_fs_uuid: &'a str,
    pub root_device: &'a str,
    pub cmdline: &'a str,
    pub loader_source: Option<&'a Path>,
    pub shim_sources: Option<ShimSources<'a>>,
}

/// Paths to the shim/grub/MOK manager binaries as staged in the extracted
/// root, before they are copied onto the ESP.
pub struct ShimSources<'a> {
    pub shim: &'a Path,
    pub real_loader: &'a Path,
    pub mok_manager: &'a Path,
}

/// Install and configure the bootloader for `ctx.slot`, then register it as
/// the next EFI boot entry.
pub fn install(ctx: &BootloaderContext) -> Result<(), TridentError> {
    match ctx.kind {
        BootloaderKind::Grub => install_grub(ctx)?,
        BootloaderKind::SystemdBoot => install_systemd_boot(ctx)?,
    }

    if let Some(shim) = &ctx.shim_sources {
        stage_secure_boot(ctx, shim)?;
    }

    register_boot_entry(ctx)
}

fn install_grub(ctx: &BootloaderContext) -> Result<(), TridentError> {
    grub::install(ctx.esp_mount, ctx.arch)?;
    let cfg_path = ctx.esp_mount.join("EFI/BOOT/grub.cfg");
    grub::render_config(ctx.root_fs_uuid, ctx.root_device, ctx.cmdline, &cfg_path)
}

fn install_systemd_boot(ctx: &BootloaderContext) -> Result<(), TridentError> {
    let loader_dir = ctx.esp_mount.join("loader");
    let entries_dir = loader_dir.join("entries");
    std::fs::create_dir_all(&entries_dir)
        .structured(Kind::Fatal, "failed to create systemd-boot entries directory")?;

    let entry_id = format!("nbc-{}", ctx.slot.letter().to_lowercase());
    systemd_boot::write_entry(
        &entries_dir,
        &entry_id,
        &format!("nbc ({})", ctx.slot.letter()),
        ctx.root_fs_uuid,
        ctx.root_device,
        ctx.cmdline,
    )?;
    systemd_boot::write_loader_conf(&loader_dir, &entry_id)?;

    // Secure Boot stages the loader itself as part of the shim chain
    // (`stage_secure_boot`); without a chain nothing else copies it, so the
    // plain fallback loader path `register_boot_entry` points
    // `efibootmgr` at would otherwise never exist on the ESP.
    if ctx.shim_sources.is_none() {
        let source = ctx
            .loader_source
            .structured(Kind::Fatal, "systemd-boot image has no loader binary to stage onto the ESP")?;
        let boot_dir = ctx.esp_mount.join("EFI/BOOT");
        std::fs::create_dir_all(&boot_dir)
            .structured(Kind::Fatal, "failed to create EFI/BOOT directory on the ESP")?;
        let dest = boot_dir.join(ctx.arch.efi_fallback_name());
        std::fs::copy(source, &dest)
            .structured(Kind::Fatal, format!("failed to copy {} to {}", source.display(), dest.display()))?;
    }
    Ok(())
}

fn stage_secure_boot(ctx: &BootloaderContext, shim: &ShimSources) -> Result<(), TridentError> {
    let boot_dir = secureboot::ensure_upper_case_boot_dir(ctx.esp_mount)?;
    secureboot::stage_chain(&boot_dir, ctx.arch, shim.shim, shim.real_loader, shim.mok_manager)
}

/// Register the firmware boot entry for this slot and move it to the front
/// of the boot order.
fn register_boot_entry(ctx: &BootloaderContext) -> Result<(), TridentError> {
    let loader_path = secure_boot_or_plain_loader_path(ctx);
    let label = format!("nbc ({})", ctx.slot.letter());

    let disk = ctx.esp_device.base_name();
    let part_number = PartitionRole::Esp.index();
    efibootmgr::create_entry(&disk, part_number, &label, &loader_path)?;

    let current = efibootmgr::list()?;
    let new_entry = current
        .entries
        .iter()
        .find(|e| e.label == label)
        .structured(Kind::Fatal, "efibootmgr did not report the entry it just created")?;
    efibootmgr::set_first_boot_order(&new_entry.id, &current)
}

fn secure_boot_or_plain_loader_path(ctx: &BootloaderContext) -> String {
    format!("\\EFI\\BOOT\\{}", ctx.arch.efi_fallback_name())
}

/// Compose the device path systemd-boot/GRUB should reference as `root=`:
/// the LUKS mapper path when encrypted, the raw partition node otherwise.
pub fn root_device_argument(plain_partition: &Path, mapper_path: Option<&Path>) -> String {
    mapper_path
        .unwrap_or(plain_partition)
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_device_argument_prefers_mapper_path() {
        let plain = PathBuf::from("/dev/sdb2");
        let mapper = PathBuf::from("/dev/mapper/root1");
        assert_eq!(root_device_argument(&plain, Some(&mapper)), "/dev/mapper/root1");
        assert_eq!(root_device_argument(&plain, None), "/dev/sdb2");
    }

    #[test]
    fn probe_image_defaults_to_grub_with_no_shim_when_nothing_is_staged() {
        let dir = tempfile::tempdir().unwrap();
        let (kind, loader_source, shim) = probe_image(dir.path(), SystemArchitecture::Amd64);
        assert_eq!(kind, BootloaderKind::Grub);
        assert!(loader_source.is_none());
        assert!(shim.is_none());
    }

    #[test]
    fn probe_image_detects_systemd_boot_loader() {
        let dir = tempfile::tempdir().unwrap();
        let loader_dir = dir.path().join("usr/lib/systemd/boot/efi");
        std::fs::create_dir_all(&loader_dir).unwrap();
        std::fs::write(loader_dir.join("systemd-bootx64.efi"), b"x").unwrap();
        let (kind, loader_source, _) = probe_image(dir.path(), SystemArchitecture::Amd64);
        assert_eq!(kind, BootloaderKind::SystemdBoot);
        assert_eq!(loader_source.unwrap(), loader_dir.join("systemd-bootx64.efi"));
    }

    #[test]
    fn loader_path_falls_back_to_arch_fallback_name_under_secure_boot() {
        let device = Device {
            path: PathBuf::from("/dev/sdb"),
            kind: trident_api::DeviceKind::Ssd,
            size_bytes: 0,
            rotational: false,
        };
        let ctx = BootloaderContext {
            kind: BootloaderKind::SystemdBoot,
            arch: SystemArchitecture::Amd64,
            esp_mount: Path::new("/mnt/esp"),
            esp_device: &device,
            slot: Slot::A,
            root_fs_uuid: "uuid",
            root_device: "/dev/mapper/root1",
            cmdline: "quiet",
            loader_source: None,
            shim_sources: None,
        };
        assert_eq!(secure_boot_or_plain_loader_path(&ctx), "\\EFI\\BOOT\\BOOTX64.EFI");
    }

    #[test]
    fn install_systemd_boot_copies_loader_to_esp_fallback_path_without_shim() {
        let dir = tempfile::tempdir().unwrap();
        let esp = dir.path().join("esp");
        std::fs::create_dir_all(&esp).unwrap();
        let loader_src = dir.path().join("systemd-bootx64.efi");
        std::fs::write(&loader_src, b"loader-bytes").unwrap();

        let device = Device {
            path: PathBuf::from("/dev/sdb"),
            kind: trident_api::DeviceKind::Ssd,
            size_bytes: 0,
            rotational: false,
        };
        let ctx = BootloaderContext {
            kind: BootloaderKind::SystemdBoot,
            arch: SystemArchitecture::Amd64,
            esp_mount: &esp,
            esp_device: &device,
            slot: Slot::A,
            root_fs_uuid: "uuid",
            root_device: "/dev/mapper/root1",
            cmdline: "quiet",
            loader_source: Some(&loader_src),
            shim_sources: None,
        };
        install_systemd_boot(&ctx).unwrap();
        let staged = esp.join("EFI/BOOT/BOOTX64.EFI");
        assert_eq!(std::fs::read(staged).unwrap(), b"loader-bytes");
    }
}
