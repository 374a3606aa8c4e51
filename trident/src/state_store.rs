//! Persistence for [`SystemState`], including the two-phase commit that
//! closes the window between switching the bootloader default and
//! recording that the switch happened: `pending-state.json` is written and
//! fsync'd immediately before the bootloader default switch, then renamed
//! onto `config.json` once the switch succeeds.
//!
//! Write-new-then-rename throughout, using `tempfile::NamedTempFile` rather
//! than a hand-rolled temp path.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use trident_api::{
    constants::{
        LEGACY_STATE_DIR, PENDING_STATE_FILE_NAME, STATE_DIR, STATE_FILE_NAME,
    },
    Kind, ReportError, SystemState, TridentError,
};

/// Paths the state store reads and writes, parameterized so tests can point
/// it at a scratch directory instead of the real `/var/lib/nbc`.
pub struct StateStore {
    state_dir: PathBuf,
    legacy_dir: PathBuf,
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore {
            state_dir: PathBuf::from(STATE_DIR),
            legacy_dir: PathBuf::from(LEGACY_STATE_DIR),
        }
    }
}

impl StateStore {
    pub fn at(state_dir: impl Into<PathBuf>, legacy_dir: impl Into<PathBuf>) -> Self {
        StateStore {
            state_dir: state_dir.into(),
            legacy_dir: legacy_dir.into(),
        }
    }

    fn config_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE_NAME)
    }

    fn pending_path(&self) -> PathBuf {
        self.state_dir.join(PENDING_STATE_FILE_NAME)
    }

    fn legacy_config_path(&self) -> PathBuf {
        self.legacy_dir.join(STATE_FILE_NAME)
    }

    /// Read the current `SystemState`, migrating forward from the legacy
    /// `/etc/nbc` location on first run. Returns `None` if no
    /// system is installed yet. Never mutates beyond the one-time
    /// migration copy.
    pub fn read(&self) -> Result<Option<SystemState>, TridentError> {
        let primary = self.config_path();
        if primary.is_file() {
            return Ok(Some(self.load(&primary)?));
        }

        let legacy = self.legacy_config_path();
        if legacy.is_file() {
            let state = self.load(&legacy)?;
            self.write(&state)?;
            return Ok(Some(state));
        }

        Ok(None)
    }

    /// Surfaces a leftover `pending-state.json` with no corresponding
    /// commit: evidence a previous operation died between the bootloader
    /// switch and the state rename.
    pub fn pending(&self) -> Result<Option<SystemState>, TridentError> {
        let pending = self.pending_path();
        if pending.is_file() {
            Ok(Some(self.load(&pending)?))
        } else {
            Ok(None)
        }
    }

    fn load(&self, path: &Path) -> Result<SystemState, TridentError> {
        let bytes = fs::read(path)
            .structured(Kind::Fatal, format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).structured(
            Kind::Corruption,
            format!("failed to parse system state at {}", path.display()),
        )
    }

    /// Write-new-then-rename the final, committed state document: mode 0644 for the file, 0755 for its directory.
    pub fn write(&self, state: &SystemState) -> Result<(), TridentError> {
        ensure_dir(&self.state_dir)?;
        atomic_write_json(&self.config_path(), state)?;
        // A successful commit makes any stale pending marker moot.
        let _ = fs::remove_file(self.pending_path());
        Ok(())
    }

    /// Stage `state` as `pending-state.json`, fsync'd, before the
    /// bootloader default is switched.
    pub fn stage_pending(&self, state: &SystemState) -> Result<(), TridentError> {
        ensure_dir(&self.state_dir)?;
        atomic_write_json(&self.pending_path(), state)
    }

    /// Promote a staged `pending-state.json` to `config.json` once the
    /// bootloader switch has succeeded.
    pub fn commit_pending(&self) -> Result<(), TridentError> {
        let pending = self.pending_path();
        let config = self.config_path();
        fs::rename(&pending, &config).structured(
            Kind::Fatal,
            "failed to commit pending state document after bootloader switch",
        )
    }
}

fn ensure_dir(dir: &Path) -> Result<(), TridentError> {
    fs::create_dir_all(dir).structured(Kind::Fatal, "failed to create state directory")?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
            .structured(Kind::Fatal, "failed to set state directory permissions")?;
    }
    Ok(())
}

fn atomic_write_json(path: &Path, state: &SystemState) -> Result<(), TridentError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .structured(Kind::Fatal, "failed to create state document temp file")?;
    let rendered = serde_json::to_vec_pretty(state)
        .structured(Kind::Fatal, "failed to encode system state")?;
    tmp.write_all(&rendered)
        .structured(Kind::Fatal, "failed to write state document")?;
    tmp.as_file()
        .sync_all()
        .structured(Kind::Fatal, "failed to fsync state document")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .structured(Kind::Fatal, "failed to set state document permissions")?;
    }

    tmp.persist(path)
        .map_err(|e| e.error)
        .structured(Kind::Fatal, format!("failed to commit {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdefs::{RootFileSystemType, Slot};
    use trident_api::{status::BootloaderKind, status::CryptoConfigSnapshot};

    fn sample() -> SystemState {
        SystemState {
            schema_version: 1,
            image_reference: "example/os:latest".into(),
            image_digest: "sha256:aaaa".into(),
            pull_timestamp: "2026-01-01T00:00:00Z".into(),
            boot_device: "/dev/disk/by-id/fake".into(),
            active_slot: Slot::A,
            root_filesystem: RootFileSystemType::Ext4,
            bootloader: BootloaderKind::Grub,
            crypto: CryptoConfigSnapshot::default(),
            kernel_arguments: vec![],
            os_name: "Example OS".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        let state = sample();
        store.write(&state).unwrap();
        let read_back = store.read().unwrap().unwrap();
        assert_eq!(state, read_back);
    }

    #[test]
    fn migrates_from_legacy_location_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("legacy");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(
            legacy.join(STATE_FILE_NAME),
            serde_json::to_vec_pretty(&sample()).unwrap(),
        )
        .unwrap();

        let store = StateStore::at(dir.path().join("state"), legacy);
        let read_back = store.read().unwrap().unwrap();
        assert_eq!(read_back, sample());
        // Migration persists into the new location so it isn't repeated.
        assert!(store.config_path().is_file());
    }

    #[test]
    fn pending_state_is_visible_before_commit_and_gone_after() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        let mut staged = sample();
        staged.active_slot = Slot::B;
        store.stage_pending(&staged).unwrap();

        assert_eq!(store.pending().unwrap().unwrap(), staged);
        assert!(store.read().unwrap().is_none());

        store.commit_pending().unwrap();
        assert_eq!(store.read().unwrap().unwrap(), staged);
        assert!(store.pending().unwrap().is_none());
    }

    #[test]
    fn successful_write_clears_a_stale_pending_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("state"), dir.path().join("legacy"));
        store.stage_pending(&sample()).unwrap();
        store.write(&sample()).unwrap();
        assert!(store.pending().unwrap().is_none());
    }
}
