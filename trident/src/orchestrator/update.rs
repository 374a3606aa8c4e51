//! In-place A/B update pipeline:
//!
//! ```text
//! lock(system) -> probe existing layout -> read SystemState
//!   -> determine active slot -> inactive = other slot
//!   -> resolve image ref (flag | staged cache | state) -> fetch digest
//!   -> if digest matches and not --force: report up to date, stop
//!   -> (opt) open inactive slot's crypto envelope
//!   -> format inactive root -> mount inactive -> extract -> verify
//!   -> render configs targeting inactive slot
//!   -> stage kernel + rebuilt initramfs onto the ESP
//!   -> stage pending SystemState
//!   -> install/update bootloader, set default to inactive slot
//!   -> commit pending SystemState
//!   -> unmount, close crypto, release lock
//! ```
//!
//! The pending state document is staged immediately *before* the bootloader
//! default is switched, and committed only after that switch succeeds. This
//! is why [`StateStore`] carries `stage_pending`/`commit_pending` rather
//! than a single `write`: if the process dies between the two, the next
//! `status` or `update` invocation finds a pending state document naming
//! the slot the bootloader may already default to, instead of a firmware
//! default pointing somewhere `config.json` says nothing about.

use std::{fs, path::PathBuf};

use tempfile::TempDir;
use trident_api::{
    device::partition_node_for, CacheEntry, CachePurpose, CryptoEnvelope, ImageRef, Kind,
    PartitionInfo, PartitionRole, ReportError, SystemState, TridentError,
};

use osutils::{blkid, dependencies::Dependency, mkfs, mount::MountStack};

use crate::{
    bootloader::{self, BootloaderContext, ShimSources},
    cache::Cache,
    cancellation::CancellationToken,
    cmdline::{self, CmdlineInputs},
    config_render,
    extractor,
    image::{self, ImageSource},
    kernel,
    lock::system_lock,
    reporter::Reporter,
    state_store::StateStore,
};

use super::{reopen_envelope, UpdateOptions};

fn required_dependencies(state: &SystemState) -> Vec<Dependency> {
    let mut deps = vec![
        Dependency::Blkid,
        Dependency::Mount,
        Dependency::Umount,
        Dependency::GrubInstall,
        Dependency::Efibootmgr,
        Dependency::Chroot,
        Dependency::Dracut,
    ];
    deps.push(match state.root_filesystem {
        sysdefs::RootFileSystemType::Ext4 => Dependency::MkfsExt4,
        sysdefs::RootFileSystemType::Btrfs => Dependency::MkfsBtrfs,
    });
    if state.crypto.enabled {
        deps.push(Dependency::Cryptsetup);
    }
    deps
}

/// Run an update end to end, returning the [`SystemState`] left in effect
/// (unchanged if the update was a no-op, a check, or download-only).
pub fn run(
    opts: &UpdateOptions,
    reporter: &mut dyn Reporter,
    cancellation: &CancellationToken,
) -> Result<SystemState, TridentError> {
    opts.validate()?;

    reporter.step("acquiring system lock");
    let _lock = system_lock()?;
    cancellation.check()?;

    reporter.step("reading system state");
    let store = StateStore::default();
    let current = store
        .read()?
        .structured(Kind::Precondition, "no system is installed; run install first")?;
    if let Some(pending) = store.pending()? {
        reporter.warning(&format!(
            "a previous operation left an uncommitted state document targeting slot {}; \
             the bootloader default may not match what is recorded as active. Do not reboot \
             until this is resolved.",
            pending.active_slot
        ));
    }

    osutils::dependencies::Dependency::check_all(&required_dependencies(&current))?;

    let boot_device = opts
        .device
        .clone()
        .unwrap_or_else(|| PathBuf::from(&current.boot_device));
    let active = current.active_slot;
    let inactive = active.other();

    reporter.step("resolving update image");
    let target_reference = target_reference_string(opts, &current)?;
    let source = resolve_update_source(opts, &current, &target_reference)?;
    let digest = source.digest().to_string();
    cancellation.check()?;

    if !opts.force && current.is_up_to_date_with(&digest) {
        reporter.complete(&format!("already up to date at digest {digest}"));
        return Ok(current);
    }

    if opts.check {
        reporter.complete(&format!("update available: {digest} (not applied, --check)"));
        return Err(TridentError::new(
            Kind::OperatorError,
            "--check: an update is available but was not applied",
        ));
    }

    if opts.download_only {
        reporter.step("staging image in cache");
        stage_into_update_cache(source.as_ref(), &digest, &target_reference)?;
        reporter.complete(&format!("staged {digest} for a later update"));
        return Ok(current);
    }

    reporter.step("preparing inactive slot");
    let inactive_role = match inactive {
        sysdefs::Slot::A => PartitionRole::RootA,
        sysdefs::Slot::B => PartitionRole::RootB,
    };
    let inactive_info = PartitionInfo {
        role: inactive_role,
        node: partition_node_for(&boot_device, inactive_role.index()),
        size_bytes: 0,
        filesystem_uuid: None,
    };
    let var_info = PartitionInfo {
        role: PartitionRole::Var,
        node: partition_node_for(&boot_device, PartitionRole::Var.index()),
        size_bytes: 0,
        filesystem_uuid: None,
    };
    let esp_info = PartitionInfo {
        role: PartitionRole::Esp,
        node: partition_node_for(&boot_device, PartitionRole::Esp.index()),
        size_bytes: 0,
        filesystem_uuid: None,
    };

    let mut envelopes = Vec::new();
    if current.crypto.enabled {
        reopen_slot_envelope(&inactive_info, &current, &mut envelopes)?;
        if !mapper_is_open("var") {
            reopen_slot_envelope(&var_info, &current, &mut envelopes)?;
        } else {
            envelopes.push(existing_envelope(&var_info, &current)?);
        }
    }
    cancellation.check()?;

    let result = update_onto_inactive_slot(
        opts,
        reporter,
        cancellation,
        &current,
        inactive,
        &boot_device,
        &inactive_info,
        &var_info,
        &esp_info,
        &envelopes,
        source.as_ref(),
        &digest,
        &target_reference,
    );
    if current.crypto.enabled {
        super::close_envelopes(&envelopes);
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn update_onto_inactive_slot(
    opts: &UpdateOptions,
    reporter: &mut dyn Reporter,
    cancellation: &CancellationToken,
    current: &SystemState,
    inactive: sysdefs::Slot,
    boot_device: &std::path::Path,
    inactive_info: &PartitionInfo,
    var_info: &PartitionInfo,
    esp_info: &PartitionInfo,
    envelopes: &[CryptoEnvelope],
    source: &dyn ImageSource,
    digest: &str,
    target_reference: &str,
) -> Result<SystemState, TridentError> {
    let inactive_device = super::active_device_for(inactive_info, envelopes);
    let var_device = super::active_device_for(var_info, envelopes);

    reporter.step("formatting inactive root");
    mkfs::format_data(&inactive_device, current.root_filesystem)?;
    cancellation.check()?;

    reporter.step("mounting inactive root");
    let scratch = TempDir::new().structured(Kind::Fatal, "failed to create update mount scratch directory")?;
    let root_mount = scratch.path();
    let mut mounts = MountStack::new();
    mounts.push(&inactive_device, root_mount, &[])?;
    let esp_mount = root_mount.join(trident_api::constants::BOOT_MOUNT_POINT);
    mounts.push(&esp_info.node, &esp_mount, &[])?;
    let var_mount = root_mount.join(trident_api::constants::VAR_MOUNT_POINT);
    mounts.push(&var_device, &var_mount, &[])?;
    cancellation.check()?;

    reporter.step("extracting image");
    let total_bytes = extractor::extract(source, root_mount, cancellation, reporter)?;
    extractor::verify(root_mount, total_bytes)?;

    let arch = sysdefs::SystemArchitecture::current();
    let (bootloader_kind, loader_source, shim_paths) = bootloader::probe_image(root_mount, arch);

    reporter.step("rendering configuration");
    let esp_fs_uuid = blkid::filesystem_uuid(&esp_info.node)?;
    config_render::write_fstab(root_mount, &esp_fs_uuid)?;
    config_render::write_crypttab(root_mount, envelopes, current.crypto.tpm2_enrolled)?;
    config_render::write_machine_id(root_mount)?;
    config_render::seed_etc_overlay(&var_mount)?;
    config_render::install_etc_overlay_module(root_mount)?;
    cancellation.check()?;

    reporter.step("staging kernel and initramfs onto the ESP");
    kernel::stage_boot_payload(root_mount, &esp_mount)?;
    cancellation.check()?;

    let inactive_device_str = inactive_device.to_string_lossy().into_owned();
    let var_device_str = var_device.to_string_lossy().into_owned();
    let esp_fs_uuid_str = esp_fs_uuid.to_string();
    let cmdline = cmdline::build(&CmdlineInputs {
        root_device: &inactive_device_str,
        root_fstype: current.root_filesystem,
        var_device: &var_device_str,
        crypto: envelopes,
        tpm2_enrolled: current.crypto.tpm2_enrolled,
        custom_args: &opts.kargs,
        console: None,
        serial: None,
    });
    let shim_sources = shim_paths.as_ref().map(|p| ShimSources {
        shim: &p.shim,
        real_loader: &p.real_loader,
        mok_manager: &p.mok_manager,
    });
    let esp_device = osutils::lsblk::probe(&esp_info.node)
        .unwrap_or_else(|_| trident_api::Device {
            path: esp_info.node.clone(),
            kind: trident_api::DeviceKind::Ssd,
            size_bytes: 0,
            rotational: false,
        });

    let mut luks_uuids = current.crypto.luks_uuids.clone();
    for envelope in envelopes {
        luks_uuids.insert(envelope.mapper_name.clone(), envelope.luks_uuid);
    }
    let new_state = SystemState {
        schema_version: current.schema_version,
        image_reference: target_reference.to_string(),
        image_digest: digest.to_string(),
        pull_timestamp: chrono::Utc::now().to_rfc3339(),
        boot_device: boot_device.to_string_lossy().into_owned(),
        active_slot: inactive,
        root_filesystem: current.root_filesystem,
        bootloader: bootloader_kind,
        crypto: trident_api::CryptoConfigSnapshot {
            enabled: current.crypto.enabled,
            tpm2_enrolled: current.crypto.tpm2_enrolled,
            luks_uuids,
        },
        kernel_arguments: opts.kargs.clone(),
        os_name: current.os_name.clone(),
        updated_at: chrono::Utc::now().to_rfc3339(),
    };

    reporter.step("persisting pending state");
    let store = StateStore::default();
    // Staged before the bootloader default is switched below: a crash
    // between here and the switch leaves `config.json` still naming the
    // active slot, with no pending document claiming otherwise, so the next
    // invocation sees a consistent (if unfinished) update rather than a
    // firmware default pointing at a slot `config.json` doesn't know about.
    store.stage_pending(&new_state)?;

    reporter.step("installing bootloader");
    bootloader::install(&BootloaderContext {
        kind: bootloader_kind,
        arch,
        esp_mount: &esp_mount,
        esp_device: &esp_device,
        slot: inactive,
        root_fs_uuid: &esp_fs_uuid_str,
        root_device: &inactive_device_str,
        cmdline: &cmdline,
        loader_source: loader_source.as_deref(),
        shim_sources,
    })?;
    cancellation.check()?;

    reporter.step("persisting system state");
    store.commit_pending()?;

    reporter.step("releasing resources");
    drop(mounts);

    reporter.complete(&format!(
        "update complete: slot {} now holds {} (reboot to apply)",
        inactive, digest
    ));
    Ok(new_state)
}

fn reopen_slot_envelope(
    info: &PartitionInfo,
    current: &SystemState,
    envelopes: &mut Vec<CryptoEnvelope>,
) -> Result<(), TridentError> {
    let mapper_name = CryptoEnvelope::mapper_name_for(info.role)
        .structured(Kind::Fatal, "the ESP has no LUKS mapper name")?;
    reopen_envelope(info, mapper_name, current.crypto.tpm2_enrolled)?;
    envelopes.push(existing_envelope(info, current)?);
    Ok(())
}

fn existing_envelope(info: &PartitionInfo, current: &SystemState) -> Result<CryptoEnvelope, TridentError> {
    let mapper_name = CryptoEnvelope::mapper_name_for(info.role)
        .structured(Kind::Fatal, "the ESP has no LUKS mapper name")?
        .to_string();
    let luks_uuid = current.crypto.luks_uuid_for(&mapper_name).structured(
        Kind::Corruption,
        format!("system state has no recorded LUKS UUID for {mapper_name}"),
    )?;
    Ok(CryptoEnvelope {
        partition: info.role,
        luks_uuid,
        mapper_name,
    })
}

fn mapper_is_open(mapper_name: &str) -> bool {
    PathBuf::from("/dev/mapper").join(mapper_name).exists()
}

/// The image reference string this update targets, before it is resolved to
/// a concrete source: the explicit `--image`, or the reference already
/// recorded in `SystemState` when running `--auto`.
fn target_reference_string(opts: &UpdateOptions, current: &SystemState) -> Result<String, TridentError> {
    match &opts.image {
        Some(image) => Ok(image.to_string()),
        None => Ok(current.image_reference.clone()),
    }
}

/// Resolve the update's image source:
/// `--local-image` goes to the local container daemon; `--skip-pull` looks
/// for an already-staged cache entry under the update purpose; otherwise an
/// explicit `--image` (or, under `--auto`, the reference recorded in
/// `SystemState`) is pulled from its registry.
fn resolve_update_source(
    opts: &UpdateOptions,
    current: &SystemState,
    target_reference: &str,
) -> Result<Box<dyn ImageSource>, TridentError> {
    if opts.local_image {
        let image_ref = opts
            .image
            .clone()
            .structured(Kind::OperatorError, "--local-image requires --image")?;
        return image::resolve_local_daemon(&image_ref);
    }

    if opts.skip_pull {
        let cache = Cache::default();
        let entry = cache
            .list(CachePurpose::Update)?
            .into_iter()
            .find(|e| e.image_reference == target_reference)
            .structured(
                Kind::OperatorError,
                format!("--skip-pull: no cache entry staged for {target_reference}"),
            )?;
        let layout_dir = cache.layout_dir(CachePurpose::Update, &entry.digest);
        return image::resolve(&ImageRef::Local(layout_dir));
    }

    match &opts.image {
        Some(image_ref) => image::resolve(image_ref),
        None => {
            let image_ref = ImageRef::parse(&current.image_reference).map_err(|e| {
                TridentError::new(
                    Kind::Corruption,
                    format!("system state has an unparseable image reference: {e}"),
                )
            })?;
            image::resolve(&image_ref)
        }
    }
}

/// Materialize `source` as an OCI layout under the update cache. Staged under the cache root itself (rather
/// than the system's default temp directory) so the final move into the
/// cache entry's layout directory is a same-filesystem rename.
fn stage_into_update_cache(source: &dyn ImageSource, digest: &str, image_reference: &str) -> Result<(), TridentError> {
    let cache_root = PathBuf::from(trident_api::constants::CACHE_ROOT);
    fs::create_dir_all(&cache_root).structured(Kind::Fatal, "failed to create cache root directory")?;
    let scratch = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(&cache_root)
        .structured(Kind::Fatal, "failed to create cache staging directory")?;

    let size_bytes = image::stage(source, scratch.path())?;

    let entry = CacheEntry {
        digest: digest.to_string(),
        image_reference: image_reference.to_string(),
        pulled_at: chrono::Utc::now().to_rfc3339(),
        size_bytes,
    };

    let cache = Cache::default();
    cache.add(CachePurpose::Update, entry, |layout_dir| {
        move_dir_contents(scratch.path(), layout_dir)
    })
}

/// Move every top-level entry of `from` into `to`, both already-created
/// directories on the same filesystem.
fn move_dir_contents(from: &std::path::Path, to: &std::path::Path) -> Result<(), TridentError> {
    for child in fs::read_dir(from).structured(Kind::Fatal, "failed to list staged cache layout")? {
        let child = child.structured(Kind::Fatal, "failed to read staged cache layout entry")?;
        let dest = to.join(child.file_name());
        fs::rename(child.path(), &dest).structured(Kind::Fatal, "failed to move staged cache layout into place")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdefs::{RootFileSystemType, Slot};
    use trident_api::CryptoConfigSnapshot;

    fn sample_state() -> SystemState {
        SystemState {
            schema_version: 1,
            image_reference: "example/os:latest".into(),
            image_digest: "sha256:aaaa".into(),
            pull_timestamp: "2026-01-01T00:00:00Z".into(),
            boot_device: "/dev/disk/by-id/fake".into(),
            active_slot: Slot::A,
            root_filesystem: RootFileSystemType::Ext4,
            bootloader: trident_api::BootloaderKind::Grub,
            crypto: CryptoConfigSnapshot::default(),
            kernel_arguments: vec![],
            os_name: "Example OS".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn target_reference_prefers_explicit_image_over_state() {
        let current = sample_state();
        let opts = UpdateOptions {
            image: Some(ImageRef::parse("example/os:stable").unwrap()),
            ..Default::default()
        };
        assert_eq!(
            target_reference_string(&opts, &current).unwrap(),
            "docker.io/example/os:stable"
        );
    }

    #[test]
    fn target_reference_falls_back_to_state_under_auto() {
        let current = sample_state();
        let opts = UpdateOptions { auto: true, ..Default::default() };
        assert_eq!(
            target_reference_string(&opts, &current).unwrap(),
            current.image_reference
        );
    }

    #[test]
    fn mapper_is_open_is_false_for_an_absent_device_node() {
        assert!(!mapper_is_open("definitely-not-a-real-mapper-name"));
    }
}
