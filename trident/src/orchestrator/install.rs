//! Fresh install pipeline:
//!
//! ```text
//! lock(system) -> validate config -> probe device -> wipe and partition
//!   -> (opt) setup crypto on partitions 2-4 -> format -> mount
//!   -> choose image source -> extract to root -> verify extraction
//!   -> render /etc/fstab, machine-id, /etc overlay seed, crypttab
//!   -> install dracut module (/etc overlay)
//!   -> (opt) set root password via chpasswd on stdin
//!   -> stage kernel + rebuilt initramfs onto the ESP
//!   -> install bootloader for Slot A as active
//!   -> persist SystemState (active = A)
//!   -> unmount, close crypto, release system lock
//! ```

use std::path::PathBuf;

use sysdefs::{Slot, SystemArchitecture};
use tempfile::TempDir;
use trident_api::{
    constants::{BOOT_MOUNT_POINT, ESP_LABEL, ESP_SIZE_BYTES, ROOT_PARTITION_SIZE_BYTES, VAR_MOUNT_POINT},
    CryptoConfigSnapshot, CryptoEnvelope, Kind, ReportError, SystemState, TridentError,
};

use osutils::{blkid, dependencies::Dependency, losetup, lsblk, mkfs, mount::MountStack, sgdisk, udevadm};

use crate::{
    bootloader::{self, BootloaderContext, ShimSources},
    cancellation::CancellationToken,
    cmdline::{self, CmdlineInputs},
    config_render,
    extractor,
    image,
    kernel,
    lock::system_lock,
    reporter::Reporter,
    state_store::StateStore,
};

use super::{active_device_for, close_envelopes, open_new_envelopes, InstallOptions};

const OS_NAME: &str = "nbc";

fn required_dependencies(opts: &InstallOptions) -> Vec<Dependency> {
    let mut deps = vec![
        Dependency::Sgdisk,
        Dependency::Udevadm,
        Dependency::Blkid,
        Dependency::Mount,
        Dependency::Umount,
        Dependency::MkfsVfat,
        Dependency::GrubInstall,
        Dependency::Efibootmgr,
        Dependency::Chroot,
        Dependency::Dracut,
    ];
    if opts.via_loopback.is_some() {
        deps.push(Dependency::Losetup);
        deps.push(Dependency::Partx);
    } else {
        deps.push(Dependency::Partprobe);
    }
    if opts.encrypt {
        deps.push(Dependency::Cryptsetup);
        if opts.tpm2 {
            deps.push(Dependency::SystemdCryptenroll);
        }
    }
    if opts.root_password.is_some() {
        deps.push(Dependency::Chpasswd);
    }
    deps
}

/// Run a fresh install end to end, returning the [`SystemState`] persisted
/// at the end of the pipeline.
pub fn run(
    opts: &InstallOptions,
    reporter: &mut dyn Reporter,
    cancellation: &CancellationToken,
) -> Result<SystemState, TridentError> {
    opts.validate()?;
    osutils::dependencies::Dependency::check_all(&required_dependencies(opts))?;

    if opts.dry_run {
        reporter.complete("dry run: configuration is valid, no changes made");
        return Err(TridentError::new(Kind::OperatorError, "dry run: no state persisted"));
    }

    reporter.step("acquiring system lock");
    let _lock = system_lock()?;
    cancellation.check()?;

    reporter.step("preparing target device");
    let (device_path, _loop_guard) = resolve_install_block_device(opts)?;
    let device = lsblk::probe(&device_path)?;
    if device.size_bytes < trident_api::constants::MIN_DEVICE_SIZE_BYTES {
        return Err(TridentError::new(
            Kind::OperatorError,
            format!(
                "{} is {} bytes, below the minimum installable size of {} bytes",
                device_path.display(),
                device.size_bytes,
                trident_api::constants::MIN_DEVICE_SIZE_BYTES
            ),
        ));
    }
    cancellation.check()?;

    reporter.step("partitioning device");
    let sizes = sgdisk::PartitionSizes {
        esp_bytes: ESP_SIZE_BYTES,
        root_bytes: ROOT_PARTITION_SIZE_BYTES,
    };
    let mut layout = sgdisk::partition(&device_path, &sizes, opts.filesystem)?;
    sgdisk::rescan(&device_path, opts.via_loopback.is_some())?;
    udevadm::settle()?;
    cancellation.check()?;

    reporter.step("setting up encryption");
    let mut envelopes = Vec::new();
    if opts.encrypt {
        let secret = opts
            .secret
            .as_ref()
            .structured(Kind::Fatal, "validated install options always carry a secret when encrypted")?
            .resolve()?;
        envelopes = open_new_envelopes(&[&layout.root_a, &layout.root_b, &layout.var], &secret, opts.tpm2)?;
    }
    cancellation.check()?;

    let result = install_onto_partitioned_device(opts, reporter, cancellation, &mut layout, &envelopes, &device_path);
    if result.is_err() {
        close_envelopes(&envelopes);
    }
    result
}

/// Everything after partitioning and crypto setup, factored out so the
/// caller can uniformly close any opened envelopes on failure.
fn install_onto_partitioned_device(
    opts: &InstallOptions,
    reporter: &mut dyn Reporter,
    cancellation: &CancellationToken,
    layout: &mut trident_api::PartitionLayout,
    envelopes: &[CryptoEnvelope],
    device_path: &std::path::Path,
) -> Result<SystemState, TridentError> {
    reporter.step("formatting partitions");
    mkfs::format_esp(&layout.esp.node, ESP_LABEL)?;
    for info in [&mut layout.root_a, &mut layout.root_b, &mut layout.var] {
        let target = active_device_for(info, envelopes);
        mkfs::format_data(&target, opts.filesystem)?;
        info.filesystem_uuid = Some(blkid::filesystem_uuid(&target)?);
    }
    layout.esp.filesystem_uuid = Some(blkid::filesystem_uuid(&layout.esp.node)?);
    cancellation.check()?;

    reporter.step("mounting target root");
    let scratch = TempDir::new().structured(Kind::Fatal, "failed to create install mount scratch directory")?;
    let root_mount = scratch.path();
    let mut mounts = MountStack::new();
    let root_device = active_device_for(&layout.root_a, envelopes);
    mounts.push(&root_device, root_mount, &[])?;
    let esp_mount = root_mount.join(BOOT_MOUNT_POINT);
    mounts.push(&layout.esp.node, &esp_mount, &[])?;
    let var_device = active_device_for(&layout.var, envelopes);
    let var_mount = root_mount.join(VAR_MOUNT_POINT);
    mounts.push(&var_device, &var_mount, &[])?;
    cancellation.check()?;

    reporter.step("resolving image source");
    let source = image::resolve(&opts.image)?;
    cancellation.check()?;

    reporter.step("extracting image");
    let total_bytes = extractor::extract(source.as_ref(), root_mount, cancellation, reporter)?;
    extractor::verify(root_mount, total_bytes)?;

    let arch = SystemArchitecture::current();
    let (bootloader_kind, loader_source, shim_paths) = bootloader::probe_image(root_mount, arch);

    reporter.step("rendering configuration");
    config_render::write_fstab(root_mount, &layout.esp.filesystem_uuid.unwrap())?;
    config_render::write_crypttab(root_mount, envelopes, opts.tpm2)?;
    config_render::write_machine_id(root_mount)?;
    config_render::seed_etc_overlay(&var_mount)?;
    config_render::install_etc_overlay_module(root_mount)?;
    cancellation.check()?;

    if let Some(password) = &opts.root_password {
        reporter.step("setting root password");
        config_render::set_root_password(root_mount, password)?;
    }

    reporter.step("staging kernel and initramfs onto the ESP");
    kernel::stage_boot_payload(root_mount, &esp_mount)?;
    cancellation.check()?;

    reporter.step("installing bootloader");
    let root_device_str = root_device.to_string_lossy().into_owned();
    let var_device_str = var_device.to_string_lossy().into_owned();
    let root_fs_uuid_str = layout.esp.filesystem_uuid.unwrap().to_string();
    let cmdline = cmdline::build(&CmdlineInputs {
        root_device: &root_device_str,
        root_fstype: opts.filesystem,
        var_device: &var_device_str,
        crypto: envelopes,
        tpm2_enrolled: opts.tpm2,
        custom_args: &opts.kargs,
        console: None,
        serial: None,
    });
    let shim_sources = shim_paths.as_ref().map(|p| ShimSources {
        shim: &p.shim,
        real_loader: &p.real_loader,
        mok_manager: &p.mok_manager,
    });
    let esp_device = lsblk::probe(&layout.esp.node).unwrap_or_else(|_| fallback_esp_device(&layout.esp.node));
    bootloader::install(&BootloaderContext {
        kind: bootloader_kind,
        arch,
        esp_mount: &esp_mount,
        esp_device: &esp_device,
        slot: Slot::A,
        root_fs_uuid: &root_fs_uuid_str,
        root_device: &root_device_str,
        cmdline: &cmdline,
        loader_source: loader_source.as_deref(),
        shim_sources,
    })?;
    cancellation.check()?;

    reporter.step("persisting system state");
    let mut luks_uuids = std::collections::HashMap::new();
    for envelope in envelopes {
        luks_uuids.insert(envelope.mapper_name.clone(), envelope.luks_uuid);
    }
    let state = SystemState {
        schema_version: trident_api::constants::STATE_SCHEMA_VERSION,
        image_reference: opts.image.to_string(),
        image_digest: source.digest().to_string(),
        pull_timestamp: chrono::Utc::now().to_rfc3339(),
        boot_device: device_path.to_string_lossy().into_owned(),
        active_slot: Slot::A,
        root_filesystem: opts.filesystem,
        bootloader: bootloader_kind,
        crypto: CryptoConfigSnapshot {
            enabled: opts.encrypt,
            tpm2_enrolled: opts.tpm2,
            luks_uuids,
        },
        kernel_arguments: opts.kargs.clone(),
        os_name: OS_NAME.to_string(),
        updated_at: chrono::Utc::now().to_rfc3339(),
    };
    StateStore::default().write(&state)?;

    reporter.step("releasing resources");
    drop(mounts);

    reporter.complete(&format!("install complete: {OS_NAME} {} on slot A", state.image_digest));
    Ok(state)
}

/// Resolve the block device the install targets, attaching a loop device
/// first when `--via-loopback` names a disk image file. The returned guard detaches the loop device on drop.
fn resolve_install_block_device(opts: &InstallOptions) -> Result<(PathBuf, Option<LoopGuard>), TridentError> {
    match &opts.via_loopback {
        None => Ok((opts.device.clone(), None)),
        Some(image_path) => {
            if !image_path.exists() {
                let file = std::fs::File::create(image_path)
                    .structured(Kind::Fatal, format!("failed to create disk image {}", image_path.display()))?;
                let size = opts
                    .image_size_bytes
                    .structured(Kind::OperatorError, "--via-loopback requires --image-size")?;
                file.set_len(size)
                    .structured(Kind::Fatal, "failed to size disk image file")?;
            }
            let loop_device = losetup::attach(image_path)?;
            Ok((loop_device.clone(), Some(LoopGuard(loop_device))))
        }
    }
}

struct LoopGuard(PathBuf);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let _ = losetup::detach(&self.0);
    }
}

fn fallback_esp_device(node: &std::path::Path) -> trident_api::Device {
    trident_api::Device {
        path: node.to_path_buf(),
        kind: trident_api::DeviceKind::Ssd,
        size_bytes: 0,
        rotational: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependencies_include_tpm2_tool_only_when_requested() {
        let mut opts = sample_opts();
        opts.encrypt = true;
        opts.tpm2 = false;
        opts.secret = Some(crate::orchestrator::CryptoSecret::Passphrase("x".into()));
        assert!(!required_dependencies(&opts).contains(&Dependency::SystemdCryptenroll));

        opts.tpm2 = true;
        assert!(required_dependencies(&opts).contains(&Dependency::SystemdCryptenroll));
    }

    fn sample_opts() -> InstallOptions {
        InstallOptions {
            image: trident_api::ImageRef::parse("example/os:latest").unwrap(),
            device: PathBuf::from("/dev/sdb"),
            filesystem: sysdefs::RootFileSystemType::Ext4,
            encrypt: false,
            secret: None,
            tpm2: false,
            root_password: None,
            via_loopback: None,
            image_size_bytes: None,
            kargs: vec![],
            force: false,
            dry_run: false,
        }
    }
}
