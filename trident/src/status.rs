//! Status reporting: composes [`StateStore::read`] and
//! [`StateStore::pending`] into a single snapshot an external caller can
//! render, without itself touching the bootloader or any block device.

use sysdefs::Slot;
use trident_api::{SystemState, TridentError};

use crate::state_store::StateStore;

/// A point-in-time summary of the installed system, any uncommitted update,
/// and whether the previous slot is available to roll back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// The committed state, if a system is installed at all.
    pub installed: Option<SystemState>,
    /// A `pending-state.json` left by an update that died between the
    /// bootloader switch and the rename to `config.json`.
    pub pending: Option<SystemState>,
    /// Whether the slot not currently active still holds a previously
    /// booted system. Install always targets slot A (see
    /// `orchestrator::install`), so the only way the active slot becomes B
    /// is a completed update, at which point A is the rollback target.
    pub rollback_available: bool,
}

impl StatusReport {
    /// Human-readable line describing the pending-state hazard, if any, or
    /// `None` when the last operation committed cleanly.
    pub fn do_not_reboot_warning(&self) -> Option<String> {
        let pending = self.pending.as_ref()?;
        Some(format!(
            "a previous operation left an uncommitted state document targeting slot {}; \
             the bootloader default may not match what is recorded as active. Do not reboot \
             until this is resolved.",
            pending.active_slot
        ))
    }
}

/// Build a [`StatusReport`] from `store`.
pub fn report(store: &StateStore) -> Result<StatusReport, TridentError> {
    let installed = store.read()?;
    let pending = store.pending()?;
    let rollback_available = installed
        .as_ref()
        .map(|state| !matches!(state.active_slot, Slot::A))
        .unwrap_or(false);

    Ok(StatusReport {
        installed,
        pending,
        rollback_available,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use trident_api::{constants::STATE_SCHEMA_VERSION, CryptoConfigSnapshot};

    fn sample_state(active_slot: Slot) -> SystemState {
        SystemState {
            schema_version: STATE_SCHEMA_VERSION,
            image_reference: "example/os:latest".into(),
            image_digest: "sha256:aaaa".into(),
            pull_timestamp: "2026-01-01T00:00:00Z".into(),
            boot_device: "/dev/disk/by-id/fake".into(),
            active_slot,
            root_filesystem: sysdefs::RootFileSystemType::Ext4,
            bootloader: trident_api::BootloaderKind::Grub,
            crypto: CryptoConfigSnapshot::default(),
            kernel_arguments: vec![],
            os_name: "nbc".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn no_installed_state_reports_no_rollback_and_no_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        let status = report(&store).unwrap();
        assert!(status.installed.is_none());
        assert!(!status.rollback_available);
        assert!(status.do_not_reboot_warning().is_none());
    }

    #[test]
    fn fresh_install_on_slot_a_has_no_rollback_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        store.write(&sample_state(Slot::A)).unwrap();
        let status = report(&store).unwrap();
        assert!(!status.rollback_available);
    }

    #[test]
    fn completed_update_onto_slot_b_makes_slot_a_a_rollback_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        store.write(&sample_state(Slot::B)).unwrap();
        let status = report(&store).unwrap();
        assert!(status.rollback_available);
    }

    #[test]
    fn pending_state_surfaces_a_do_not_reboot_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        store.write(&sample_state(Slot::A)).unwrap();
        store.stage_pending(&sample_state(Slot::B)).unwrap();
        let status = report(&store).unwrap();
        assert!(status.pending.is_some());
        assert!(status.do_not_reboot_warning().unwrap().contains("slot B"));
    }
}
