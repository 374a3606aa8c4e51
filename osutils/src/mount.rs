//! Mount/unmount ordering: a stack that
//! unwinds multiple nested mounts in reverse order on `Drop`, downgrading
//! unmount failures to warnings rather than propagating them.

use std::{fs, path::Path, path::PathBuf, process::Command};

use log::warn;
use trident_api::{Kind, ReportError, TridentError};

use crate::exe::RunAndCheck;

pub fn mount(device_path: &Path, mount_point: &Path, options: &[&str]) -> Result<(), TridentError> {
    ensure_mount_point(mount_point)?;

    let mut cmd = Command::new("mount");
    if !options.is_empty() {
        cmd.arg("-o").arg(options.join(","));
    }
    cmd.arg(device_path).arg(mount_point);

    cmd.run_and_check().structured(
        Kind::Fatal,
        format!(
            "failed to mount {} at {}",
            device_path.display(),
            mount_point.display()
        ),
    )
}

/// Unmount `mount_point`. Returns `Ok` even on failure after logging a
/// warning: a teardown-time unmount failure shouldn't mask the error that
/// led here.
pub fn unmount_best_effort(mount_point: &Path) {
    let result: Result<(), TridentError> = Command::new("umount")
        .arg(mount_point)
        .run_and_check()
        .structured(Kind::Transient, "unmount failed");
    if let Err(e) = result {
        warn!("failed to unmount {}: {}", mount_point.display(), e);
    }
}

fn ensure_mount_point(mount_point: &Path) -> Result<(), TridentError> {
    if mount_point.exists() {
        if !mount_point.is_dir() {
            return Err(TridentError::new(
                Kind::Fatal,
                format!("mount point {} is not a directory", mount_point.display()),
            ));
        }
    } else {
        fs::create_dir_all(mount_point)
            .structured(Kind::Fatal, "failed to create mount point directory")?;
    }
    Ok(())
}

/// Tracks nested mounts in the order they were made so they can be torn
/// down in reverse. Each unmount is best-effort; a failure is logged and
/// does not stop the rest of the stack from unwinding.
#[derive(Default)]
pub struct MountStack {
    mounted: Vec<PathBuf>,
}

impl MountStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, device_path: &Path, mount_point: &Path, options: &[&str]) -> Result<(), TridentError> {
        mount(device_path, mount_point, options)?;
        self.mounted.push(mount_point.to_path_buf());
        Ok(())
    }

    /// Record a mount made outside this stack (e.g. a bind mount done by a
    /// lower-level helper) so it still gets torn down in order.
    pub fn track(&mut self, mount_point: PathBuf) {
        self.mounted.push(mount_point);
    }
}

impl Drop for MountStack {
    fn drop(&mut self) {
        while let Some(mount_point) = self.mounted.pop() {
            unmount_best_effort(&mount_point);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_mount_point_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("esp");
        ensure_mount_point(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn ensure_mount_point_rejects_a_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("not-a-dir");
        fs::write(&target, b"x").unwrap();
        assert!(ensure_mount_point(&target).is_err());
    }

    #[test]
    fn mount_stack_tears_down_in_reverse_order() {
        // No real mounts are performed here; this only exercises the
        // ordering of the internal stack via `track`.
        let mut stack = MountStack::new();
        stack.track(PathBuf::from("/mnt/a"));
        stack.track(PathBuf::from("/mnt/a/b"));
        assert_eq!(
            stack.mounted,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/a/b")]
        );
    }
}
