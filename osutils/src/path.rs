//! Small path helpers shared by the bootloader and extractor modules.

use std::path::{Path, PathBuf};

use trident_api::{Kind, ReportError, TridentError};

/// Join a path onto a mount root, stripping a leading `/` from `relative`
/// so `Path::join` doesn't replace the root entirely.
pub fn join_relative(root: &Path, relative: &Path) -> PathBuf {
    match relative.strip_prefix("/") {
        Ok(stripped) => root.join(stripped),
        Err(_) => root.join(relative),
    }
}

/// Rename `from` to `to` through a scratch intermediate name, used where a
/// single rename between two names differing only in case can silently
/// no-op on a case-insensitive-but-preserving filesystem.
pub fn rename_case_sensitive(from: &Path, to: &Path) -> Result<(), TridentError> {
    let scratch = from.with_file_name(format!(
        ".{}.nbc-rename",
        from.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    ));
    std::fs::rename(from, &scratch)
        .structured(Kind::Fatal, "failed to stage rename through scratch name")?;
    std::fs::rename(&scratch, to).structured(Kind::Fatal, "failed to complete case rename")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_relative_strips_leading_slash() {
        assert_eq!(
            join_relative(Path::new("/mnt/root"), Path::new("/etc/fstab")),
            PathBuf::from("/mnt/root/etc/fstab")
        );
    }

    #[test]
    fn join_relative_handles_already_relative_input() {
        assert_eq!(
            join_relative(Path::new("/mnt/root"), Path::new("etc/fstab")),
            PathBuf::from("/mnt/root/etc/fstab")
        );
    }

    #[test]
    fn rename_case_sensitive_moves_directory_through_scratch_name() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("Boot");
        let to = dir.path().join("BOOT");
        std::fs::create_dir(&from).unwrap();
        std::fs::write(from.join("marker"), b"x").unwrap();
        rename_case_sensitive(&from, &to).unwrap();
        assert!(to.join("marker").exists());
        assert!(!from.exists());
    }
}
