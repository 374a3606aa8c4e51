//! Persisted paths and other fixed constants shared across crates.

/// Where [`crate::status::SystemState`] lives once installed.
pub const STATE_DIR: &str = "/var/lib/nbc/state";
pub const STATE_FILE_NAME: &str = "config.json";
pub const PENDING_STATE_FILE_NAME: &str = "pending-state.json";

/// Legacy location read on first run and migrated forward.
pub const LEGACY_STATE_DIR: &str = "/etc/nbc";

pub const CACHE_ROOT: &str = "/var/cache/nbc";
pub const CACHE_PURPOSE_INSTALL: &str = "staged-install";
pub const CACHE_PURPOSE_UPDATE: &str = "staged-update";

pub const ETC_OVERLAY_DIR: &str = "/var/lib/nbc/etc-overlay";

/// Name of the dracut module staged by `config_render::install_etc_overlay_module`
/// and force-included when `osutils::dracut::regenerate` builds an initramfs.
pub const ETC_OVERLAY_DRACUT_MODULE: &str = "nbc-etc-overlay";

/// Names under which the kernel and initramfs are staged at the ESP's root,
/// where `grub.cfg`/systemd-boot entries expect to load them from.
pub const ESP_KERNEL_NAME: &str = "vmlinuz";
pub const ESP_INITRD_NAME: &str = "initrd.img";

pub const SYSTEM_LOCK_PATH: &str = "/var/lock/nbc.lock";
pub const CACHE_LOCK_PATH: &str = "/var/lock/nbc-cache.lock";

pub const BOOTED_MARKER_PATH: &str = "/run/nbc-booted";

pub const ROOT_MOUNT_POINT: &str = "/";
pub const BOOT_MOUNT_POINT: &str = "boot";
pub const VAR_MOUNT_POINT: &str = "var";

/// Minimum installable device size.
pub const MIN_DEVICE_SIZE_BYTES: u64 = 30 * 1024 * 1024 * 1024;

/// Fixed partition sizes.
pub const ESP_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;
pub const ROOT_PARTITION_SIZE_BYTES: u64 = 12 * 1024 * 1024 * 1024;

/// Extraction sanity threshold.
pub const MIN_EXTRACTED_SIZE_BYTES: u64 = 100 * 1024 * 1024;

pub const ESP_LABEL: &str = "UEFI";

/// Present verbatim in `config.json` to allow forward migration of the
/// schema without breaking older readers.
pub const STATE_SCHEMA_VERSION: u32 = 1;
