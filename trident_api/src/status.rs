//! The persisted [`SystemState`] document — the single source of truth for
//! "what is installed".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sysdefs::{RootFileSystemType, Slot};
use uuid::Uuid;

use crate::constants::STATE_SCHEMA_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootloaderKind {
    Grub,
    SystemdBoot,
}

/// Snapshot of the crypto configuration recorded at install/update time.
/// Empty (`enabled: false`) when encryption was not requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoConfigSnapshot {
    pub enabled: bool,
    pub tpm2_enrolled: bool,
    /// LUKS container UUID for each data partition, keyed by mapper name
    /// (`root1`, `root2`, `var`).
    #[serde(default)]
    pub luks_uuids: HashMap<String, Uuid>,
}

impl CryptoConfigSnapshot {
    pub fn luks_uuid_for(&self, mapper_name: &str) -> Option<Uuid> {
        self.luks_uuids.get(mapper_name).copied()
    }
}

/// The document persisted at `/var/lib/nbc/state/config.json`.
///
/// Invariant: after a successful install or update this reflects the
/// partition that will boot next. Unknown fields are tolerated on
/// read via `#[serde(default)]` on every field added after v1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub image_reference: String,
    pub image_digest: String,
    pub pull_timestamp: String,

    pub boot_device: String,

    pub active_slot: Slot,

    pub root_filesystem: RootFileSystemType,

    pub bootloader: BootloaderKind,

    #[serde(default)]
    pub crypto: CryptoConfigSnapshot,

    #[serde(default)]
    pub kernel_arguments: Vec<String>,

    pub os_name: String,

    #[serde(default)]
    pub updated_at: String,
}

fn default_schema_version() -> u32 {
    STATE_SCHEMA_VERSION
}

impl SystemState {
    /// `true` when `digest` matches what is already recorded as installed,
    /// i.e. an update with this digest would be a no-op.
    pub fn is_up_to_date_with(&self, digest: &str) -> bool {
        self.image_digest == digest
    }
}
