//! Integration tests exercising the orchestrator's persisted-state and
//! cache surfaces against scratch directories, with no real block devices
//! or external tools involved.

use trident::cache::Cache;
use trident::state_store::StateStore;
use trident::status;
use trident_api::{constants::STATE_SCHEMA_VERSION, CacheEntry, CachePurpose, CryptoConfigSnapshot, SystemState};

fn sample_state(active_slot: sysdefs::Slot) -> SystemState {
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
fn state_store_round_trips_through_install_then_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));

    let installed = sample_state(sysdefs::Slot::A);
    store.write(&installed).unwrap();
    assert_eq!(store.read().unwrap().unwrap(), installed);

    let updated = sample_state(sysdefs::Slot::B);
    store.stage_pending(&updated).unwrap();
    assert_eq!(store.pending().unwrap().unwrap(), updated);
    // Not yet committed: `read` still reports the previous install.
    assert_eq!(store.read().unwrap().unwrap(), installed);

    store.commit_pending().unwrap();
    assert_eq!(store.read().unwrap().unwrap(), updated);
    assert!(store.pending().unwrap().is_none());
}

#[test]
fn status_report_surfaces_rollback_and_pending_warning_across_an_update() {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));

    store.write(&sample_state(sysdefs::Slot::A)).unwrap();
    let before = status::report(&store).unwrap();
    assert!(!before.rollback_available);
    assert!(before.do_not_reboot_warning().is_none());

    store.stage_pending(&sample_state(sysdefs::Slot::B)).unwrap();
    let mid_update = status::report(&store).unwrap();
    assert!(mid_update.do_not_reboot_warning().is_some());

    store.commit_pending().unwrap();
    let after = status::report(&store).unwrap();
    assert!(after.rollback_available);
    assert!(after.do_not_reboot_warning().is_none());
}

#[test]
fn cache_round_trips_a_staged_layout_and_lists_it_back() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::at(dir.path().join("cache"));

    let entry = CacheEntry {
        digest: "sha256:bbbb".into(),
        image_reference: "example/os:stable".into(),
        pulled_at: "2026-01-01T00:00:00Z".into(),
        size_bytes: 42,
    };

    cache
        .add(CachePurpose::Update, entry.clone(), |layout_dir| {
            std::fs::write(layout_dir.join("index.json"), b"{}")
                .map_err(|e| trident_api::TridentError::new(trident_api::Kind::Fatal, e.to_string()))
        })
        .unwrap();

    let listed = cache.list(CachePurpose::Update).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], entry);

    let (fetched, layout_dir) = cache.get(CachePurpose::Update, &entry.digest).unwrap().unwrap();
    assert_eq!(fetched, entry);
    assert!(layout_dir.join("index.json").is_file());

    cache.remove(CachePurpose::Update, &entry.digest).unwrap();
    assert!(cache.list(CachePurpose::Update).unwrap().is_empty());
}
