//! Streaming OCI layer extraction: whiteouts, opaque
//! directories, hardlinks, symlinks, extended attributes, and
//! SUID/SGID/sticky bits. Built on the `tar` crate's `Entries` iterator,
//! following the OCI Image Spec's whiteout convention directly; low-level
//! filesystem operations `std::fs` doesn't expose (xattrs, device nodes)
//! go through `nix`/`libc` rather than an extra wrapper crate.

use std::{
    collections::HashSet,
    fs,
    io::{Read, Write},
    os::unix::{ffi::OsStrExt, fs::PermissionsExt},
    path::{Path, PathBuf},
};

use tar::EntryType;
use tempfile::NamedTempFile;
use trident_api::{constants::MIN_EXTRACTED_SIZE_BYTES, Kind, ReportError, TridentError};

use crate::{cancellation::CancellationToken, image::ImageSource, reporter::Reporter};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_MARKER: &str = ".wh..wh..opq";

/// Materialize every layer of `source` into `target`, in manifest order.
pub fn extract(
    source: &dyn ImageSource,
    target: &Path,
    cancellation: &CancellationToken,
    reporter: &mut dyn Reporter,
) -> Result<u64, TridentError> {
    let mut total_bytes: u64 = 0;
    let layer_count = source.manifest().layers.len();

    for index in 0..layer_count {
        cancellation.check()?;
        reporter.message(&format!("extracting layer {}/{layer_count}", index + 1));

        let reader = source.open_layer(index)?;
        total_bytes += extract_layer(reader, target)?;
    }

    Ok(total_bytes)
}

fn extract_layer(reader: Box<dyn Read>, target: &Path) -> Result<u64, TridentError> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_unpack_xattrs(false); // replayed manually below, from PAX records.

    let mut bytes_written: u64 = 0;
    // Entries whose symlink target could not be resolved because it points
    // at a later entry in the same layer are allowed to dangle.
    let mut seen_opaque_dirs: HashSet<PathBuf> = HashSet::new();

    let entries = archive
        .entries()
        .structured(Kind::Corruption, "failed to read tar entries from layer")?;

    for entry in entries {
        let mut entry = entry.structured(Kind::Corruption, "corrupt tar entry in layer")?;
        let entry_path = entry
            .path()
            .structured(Kind::Corruption, "tar entry has an invalid path")?
            .into_owned();

        let Some(file_name) = entry_path.file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        let file_name = file_name.to_string_lossy().into_owned();
        let parent = entry_path.parent().unwrap_or(Path::new(""));
        let dest_parent = osutils::path::join_relative(target, parent);

        if file_name == OPAQUE_MARKER {
            if !seen_opaque_dirs.contains(&dest_parent) {
                clear_directory_contents(&dest_parent)?;
                seen_opaque_dirs.insert(dest_parent.clone());
            }
            continue;
        }

        if let Some(victim) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let victim_path = dest_parent.join(victim);
            remove_whiteout_target(&victim_path)?;
            continue;
        }

        let dest = osutils::path::join_relative(target, &entry_path);
        fs::create_dir_all(&dest_parent)
            .structured(Kind::Fatal, format!("failed to create {}", dest_parent.display()))?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&dest)
                    .structured(Kind::Fatal, format!("failed to create directory {}", dest.display()))?;
                apply_permissions(&dest, entry.header().mode().unwrap_or(0o755))?;
            }
            EntryType::Regular | EntryType::Continuous => {
                bytes_written += write_regular_file(&mut entry, &dest)?;
                replay_xattrs(&mut entry, &dest)?;
            }
            EntryType::Link => {
                let link_name = entry
                    .link_name()
                    .structured(Kind::Corruption, "hardlink entry has an invalid target")?
                    .structured(Kind::Corruption, "hardlink entry has no target")?;
                let link_target = osutils::path::join_relative(target, &link_name);
                let _ = fs::remove_file(&dest);
                if let Err(e) = fs::hard_link(&link_target, &dest) {
                    return Err(TridentError::with_source(
                        Kind::Corruption,
                        format!(
                            "failed to hardlink {} -> {}",
                            dest.display(),
                            link_target.display()
                        ),
                        e,
                    ));
                }
            }
            EntryType::Symlink => {
                let link_name = entry
                    .link_name()
                    .structured(Kind::Corruption, "symlink entry has an invalid target")?
                    .structured(Kind::Corruption, "symlink entry has no target")?;
                let _ = fs::remove_file(&dest);
                // Symlink targets are stored verbatim; a target that does
                // not yet exist on disk is fine.
                std::os::unix::fs::symlink(&link_name, &dest)
                    .structured(Kind::Fatal, format!("failed to create symlink {}", dest.display()))?;
            }
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                create_special_file(&mut entry, &dest)?;
            }
            other => {
                return Err(TridentError::new(
                    Kind::Corruption,
                    format!("unsupported tar entry type {other:?} at {}", dest.display()),
                ));
            }
        }
    }

    Ok(bytes_written)
}

fn write_regular_file(
    entry: &mut tar::Entry<impl Read>,
    dest: &Path,
) -> Result<u64, TridentError> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("/"));
    let mut tmp =
        NamedTempFile::new_in(dir).structured(Kind::Fatal, "failed to create extraction temp file")?;

    let mut buf = [0u8; 128 * 1024];
    let mut written: u64 = 0;
    loop {
        let n = entry
            .read(&mut buf)
            .structured(Kind::Corruption, format!("failed reading tar entry for {}", dest.display()))?;
        if n == 0 {
            break;
        }
        tmp.write_all(&buf[..n])
            .structured(Kind::Fatal, format!("failed writing extracted file {}", dest.display()))?;
        written += n as u64;
    }

    let mode = entry.header().mode().unwrap_or(0o644);
    tmp.as_file()
        .set_permissions(fs::Permissions::from_mode(mode))
        .structured(Kind::Fatal, "failed to set extracted file permissions")?;

    tmp.persist(dest)
        .map_err(|e| e.error)
        .structured(Kind::Fatal, format!("failed to commit extracted file {}", dest.display()))?;

    Ok(written)
}

fn apply_permissions(path: &Path, mode: u32) -> Result<(), TridentError> {
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .structured(Kind::Fatal, format!("failed to set permissions on {}", path.display()))
}

/// Replay any extended attributes carried as PAX `SCHILY.xattr.<name>`
/// records (the convention OCI layer tarballs use, inherited from GNU
/// tar's own xattr support).
fn replay_xattrs(entry: &mut tar::Entry<impl Read>, dest: &Path) -> Result<(), TridentError> {
    let Some(extensions) = entry
        .pax_extensions()
        .structured(Kind::Corruption, "failed to read PAX extensions")?
    else {
        return Ok(());
    };

    for extension in extensions {
        let extension = extension.structured(Kind::Corruption, "malformed PAX extension record")?;
        let Some(name) = extension.key().ok().and_then(|k| k.strip_prefix("SCHILY.xattr.")) else {
            continue;
        };
        set_xattr(dest, name, extension.value_bytes())?;
    }
    Ok(())
}

fn set_xattr(path: &Path, name: &str, value: &[u8]) -> Result<(), TridentError> {
    let path_c = std::ffi::CString::new(path.as_os_str().as_bytes())
        .structured(Kind::Fatal, "extraction path contains a NUL byte")?;
    let name_c =
        std::ffi::CString::new(name).structured(Kind::Fatal, "xattr name contains a NUL byte")?;

    let rc = unsafe {
        libc::lsetxattr(
            path_c.as_ptr(),
            name_c.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Not every target filesystem supports every xattr namespace
        // (e.g. `security.*` without the matching LSM loaded); treat
        // failure to replay one as non-fatal rather than aborting the
        // whole extraction.
        log::warn!("failed to set xattr {name} on {}: {err}", path.display());
    }
    Ok(())
}

/// Create a device or FIFO node when privileged; otherwise this is a
/// warning-level no-op.
fn create_special_file(entry: &mut tar::Entry<impl Read>, dest: &Path) -> Result<(), TridentError> {
    if unsafe { libc::geteuid() } != 0 {
        log::warn!("skipping device/fifo node {} (not running as root)", dest.display());
        return Ok(());
    }

    let header = entry.header();
    let mode = header.mode().unwrap_or(0o600);
    let kind = match header.entry_type() {
        EntryType::Fifo => libc::S_IFIFO,
        EntryType::Char => libc::S_IFCHR,
        EntryType::Block => libc::S_IFBLK,
        _ => unreachable!("called only for char/block/fifo entries"),
    };

    let dev = if matches!(header.entry_type(), EntryType::Char | EntryType::Block) {
        let major = header.device_major().ok().flatten().unwrap_or(0) as u64;
        let minor = header.device_minor().ok().flatten().unwrap_or(0) as u64;
        nix::sys::stat::makedev(major, minor)
    } else {
        0
    };

    let path_c = std::ffi::CString::new(dest.as_os_str().as_bytes())
        .structured(Kind::Fatal, "extraction path contains a NUL byte")?;
    let _ = fs::remove_file(dest);
    let rc = unsafe { libc::mknod(path_c.as_ptr(), mode | kind, dev) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        return Err(TridentError::with_source(
            Kind::Fatal,
            format!("failed to create device/fifo node {}", dest.display()),
            err,
        ));
    }
    Ok(())
}

fn remove_whiteout_target(path: &Path) -> Result<(), TridentError> {
    if path.is_dir() && !path.is_symlink() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .or_else(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Ok(())
        } else {
            Err(e)
        }
    })
    .structured(Kind::Fatal, format!("failed to apply whiteout for {}", path.display()))
}

/// Apply a `.wh..wh..opq` opaque marker: every entry the target directory
/// currently has (inherited from an earlier layer) is removed before this
/// layer's own entries for that directory are unpacked.
fn clear_directory_contents(dir: &Path) -> Result<(), TridentError> {
    if !dir.is_dir() {
        return Ok(());
    }
    for child in fs::read_dir(dir).structured(Kind::Fatal, "failed to list directory for opaque whiteout")? {
        let child = child.structured(Kind::Fatal, "failed to read directory entry")?;
        remove_whiteout_target(&child.path())?;
    }
    Ok(())
}

/// Post-extraction sanity checks.
pub fn verify(target: &Path, total_bytes: u64) -> Result<(), TridentError> {
    if total_bytes < MIN_EXTRACTED_SIZE_BYTES {
        return Err(TridentError::new(
            Kind::Corruption,
            format!(
                "extracted image is suspiciously small ({total_bytes} bytes, expected at least {MIN_EXTRACTED_SIZE_BYTES})"
            ),
        ));
    }

    for required in ["etc", "usr", "var"] {
        if !target.join(required).is_dir() {
            return Err(TridentError::new(
                Kind::Corruption,
                format!("extracted image is missing required top-level directory /{required}"),
            ));
        }
    }

    let modules_dir = target.join("usr/lib/modules");
    let mut found_kernel = false;
    if let Ok(versions) = fs::read_dir(&modules_dir) {
        for version in versions.flatten() {
            if let Ok(files) = fs::read_dir(version.path()) {
                for file in files.flatten() {
                    let name = file.file_name();
                    let name = name.to_string_lossy();
                    if name.starts_with("vmlinuz") {
                        if let Ok(meta) = file.metadata() {
                            if meta.len() > 0 {
                                found_kernel = true;
                            }
                        }
                    }
                }
            }
        }
    }

    if !found_kernel {
        return Err(TridentError::new(
            Kind::Corruption,
            "extracted image has no non-empty /usr/lib/modules/<version>/vmlinuz*",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_rejects_missing_mandatory_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = verify(dir.path(), MIN_EXTRACTED_SIZE_BYTES + 1).unwrap_err();
        assert_eq!(err.kind(), Kind::Corruption);
    }

    #[test]
    fn verify_rejects_suspiciously_small_extraction() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["etc", "usr", "var"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let err = verify(dir.path(), 10).unwrap_err();
        assert_eq!(err.kind(), Kind::Corruption);
    }

    #[test]
    fn verify_passes_with_a_non_empty_vmlinuz() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["etc", "usr", "var"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let modules_dir = dir.path().join("usr/lib/modules/6.6.0");
        fs::create_dir_all(&modules_dir).unwrap();
        fs::write(modules_dir.join("vmlinuz"), b"kernel-bytes").unwrap();
        verify(dir.path(), MIN_EXTRACTED_SIZE_BYTES + 1).unwrap();
    }

    #[test]
    fn whiteout_removes_counterpart_file() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("deleted.txt");
        fs::write(&victim, b"x").unwrap();
        remove_whiteout_target(&victim).unwrap();
        assert!(!victim.exists());
    }

    #[test]
    fn whiteout_on_missing_target_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let victim = dir.path().join("never-existed.txt");
        remove_whiteout_target(&victim).unwrap();
    }

    #[test]
    fn opaque_marker_clears_existing_directory_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("etc");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("old-config"), b"stale").unwrap();
        clear_directory_contents(&target).unwrap();
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }
}
