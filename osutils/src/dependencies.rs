//! External tool resolution. Every binary the orchestrator shells out to is
//! named here; [`Dependency::check_all`] is run once at startup so a
//! missing tool surfaces as a `Precondition` failure before any disk is
//! touched, never mid-operation.

use std::process::Command;

use strum_macros::{EnumIter, IntoStaticStr};
use trident_api::error::{Kind, ReportError, TridentError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Dependency {
    Sgdisk,
    Partprobe,
    Partx,
    Losetup,
    MkfsVfat,
    MkfsExt4,
    MkfsBtrfs,
    Cryptsetup,
    SystemdCryptenroll,
    Mount,
    Umount,
    GrubInstall,
    Efibootmgr,
    Chpasswd,
    Lsblk,
    Blkid,
    Udevadm,
    Tar,
    Chroot,
    Dracut,
}

impl Dependency {
    /// Binary name as invoked on `$PATH`.
    pub fn binary_name(&self) -> &'static str {
        match self {
            Dependency::Sgdisk => "sgdisk",
            Dependency::Partprobe => "partprobe",
            Dependency::Partx => "partx",
            Dependency::Losetup => "losetup",
            Dependency::MkfsVfat => "mkfs.vfat",
            Dependency::MkfsExt4 => "mkfs.ext4",
            Dependency::MkfsBtrfs => "mkfs.btrfs",
            Dependency::Cryptsetup => "cryptsetup",
            Dependency::SystemdCryptenroll => "systemd-cryptenroll",
            Dependency::Mount => "mount",
            Dependency::Umount => "umount",
            Dependency::GrubInstall => "grub-install",
            Dependency::Efibootmgr => "efibootmgr",
            Dependency::Chpasswd => "chpasswd",
            Dependency::Lsblk => "lsblk",
            Dependency::Blkid => "blkid",
            Dependency::Udevadm => "udevadm",
            Dependency::Tar => "tar",
            Dependency::Chroot => "chroot",
            Dependency::Dracut => "dracut",
        }
    }

    pub fn exists(&self) -> bool {
        which::which(self.binary_name()).is_ok()
    }

    pub fn cmd(&self) -> Command {
        Command::new(self.binary_name())
    }

    /// Check that every dependency in `required` resolves on `$PATH`,
    /// returning a single `Precondition` error naming all that are missing.
    pub fn check_all(required: &[Dependency]) -> Result<(), TridentError> {
        let missing: Vec<&str> = required
            .iter()
            .filter(|d| !d.exists())
            .map(|d| d.binary_name())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(()).structured(
                Kind::Precondition,
                format!("required tool(s) not found on PATH: {}", missing.join(", ")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_dependency_has_a_distinct_binary_name() {
        let names: Vec<&str> = Dependency::iter().map(|d| d.binary_name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names.len(), sorted.len());
    }

    #[test]
    fn missing_dependency_is_a_precondition_error() {
        // `which` will not find a tool by this name on any real system.
        let fake = Dependency::Sgdisk;
        if !fake.exists() {
            let err = Dependency::check_all(&[fake]).unwrap_err();
            assert_eq!(err.kind(), Kind::Precondition);
        }
    }
}
