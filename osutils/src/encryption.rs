//! LUKS2 encryption and TPM2 enrollment.
//!
//! The passphrase is piped to `cryptsetup`'s stdin rather than written to a
//! key-file argument, and TPM2 enrollment omits `--tpm2-pcrs` entirely: the
//! automatic unlock is not bound to a PCR policy.

use std::{io::Write, path::Path, process::Stdio};

use tempfile::NamedTempFile;
use trident_api::{Kind, ReportError, TridentError};

use crate::{dependencies::Dependency, exe::RunAndCheck};

pub const CIPHER: &str = "aes-xts-plain64";
pub const KEY_SIZE: &str = "512";

/// Initialize a LUKS2 container on `device_path`, unlocked by `passphrase`.
/// The passphrase is written to the child's stdin, never passed as an
/// argument.
pub fn format(device_path: &Path, passphrase: &str) -> Result<(), TridentError> {
    let mut child = Dependency::Cryptsetup
        .cmd()
        .arg("luksFormat")
        .arg("--type")
        .arg("luks2")
        .arg("--cipher")
        .arg(CIPHER)
        .arg("--key-size")
        .arg(KEY_SIZE)
        .arg("--batch-mode")
        .arg(device_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .structured(Kind::Fatal, "failed to spawn cryptsetup luksFormat")?;

    write_passphrase(&mut child, passphrase)?;

    let output = child
        .wait_with_output()
        .structured(Kind::Fatal, "failed to wait on cryptsetup luksFormat")?;
    if !output.status.success() {
        return Err(TridentError::new(
            Kind::Fatal,
            format!(
                "cryptsetup luksFormat failed for {}: {}",
                device_path.display(),
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// Open a LUKS2 container, mapping it to `/dev/mapper/{mapper_name}`.
pub fn open(device_path: &Path, mapper_name: &str, passphrase: &str) -> Result<(), TridentError> {
    let mut child = Dependency::Cryptsetup
        .cmd()
        .arg("luksOpen")
        .arg(device_path)
        .arg(mapper_name)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .structured(Kind::Fatal, "failed to spawn cryptsetup luksOpen")?;

    write_passphrase(&mut child, passphrase)?;

    let output = child
        .wait_with_output()
        .structured(Kind::Fatal, "failed to wait on cryptsetup luksOpen")?;
    if !output.status.success() {
        return Err(TridentError::new(
            Kind::Fatal,
            format!(
                "cryptsetup luksOpen failed for {} as {}: {}",
                device_path.display(),
                mapper_name,
                String::from_utf8_lossy(&output.stderr)
            ),
        ));
    }
    Ok(())
}

/// Open a LUKS2 container enrolled for TPM2 auto-unlock,
/// without a passphrase: `cryptsetup` retrieves the key from the TPM2
/// device directly.
pub fn open_tpm2(device_path: &Path, mapper_name: &str) -> Result<(), TridentError> {
    Dependency::Cryptsetup
        .cmd()
        .arg("open")
        .arg("--tpm2-device=auto")
        .arg(device_path)
        .arg(mapper_name)
        .run_and_check()
        .structured(
            Kind::Fatal,
            format!(
                "cryptsetup TPM2 open failed for {} as {}",
                device_path.display(),
                mapper_name
            ),
        )
}

/// Close a previously opened mapper device. Every caller that opens
/// multiple envelopes must close the ones already open if a later one
/// fails, so this is deliberately infallible-friendly:
/// callers can ignore stray failures while unwinding and still attempt the
/// remaining closes.
pub fn close(mapper_name: &str) -> Result<(), TridentError> {
    Dependency::Cryptsetup
        .cmd()
        .arg("luksClose")
        .arg(mapper_name)
        .run_and_check()
        .structured(
            Kind::Transient,
            format!("failed to close mapper device {mapper_name}"),
        )
}

/// Enroll the system's TPM2 device as an automatic unlock method, without
/// binding to any PCR policy. The passphrase
/// used to unlock the existing key slot is written to a mode-0600 temp file
/// whose deletion is guaranteed by `NamedTempFile`'s `Drop` on every exit
/// path, including early returns from `?`.
pub fn enroll_tpm2(device_path: &Path, existing_passphrase: &str) -> Result<(), TridentError> {
    let mut keyfile =
        NamedTempFile::new().structured(Kind::Fatal, "failed to create TPM2 enrollment keyfile")?;
    set_owner_only_permissions(keyfile.path())?;
    keyfile
        .write_all(existing_passphrase.as_bytes())
        .structured(Kind::Fatal, "failed to write TPM2 enrollment keyfile")?;
    keyfile
        .flush()
        .structured(Kind::Fatal, "failed to flush TPM2 enrollment keyfile")?;

    Dependency::SystemdCryptenroll
        .cmd()
        .arg("--tpm2-device=auto")
        .arg("--unlock-key-file")
        .arg(keyfile.path())
        .arg("--wipe-slot=tpm2")
        .arg(device_path)
        .run_and_check()
        .structured(
            Kind::Fatal,
            format!("failed to enroll TPM2 device for {}", device_path.display()),
        )
}

fn write_passphrase(
    child: &mut std::process::Child,
    passphrase: &str,
) -> Result<(), TridentError> {
    let mut stdin = child
        .stdin
        .take()
        .structured(Kind::Fatal, "cryptsetup child has no stdin pipe")?;
    stdin
        .write_all(passphrase.as_bytes())
        .structured(Kind::Fatal, "failed to write passphrase to cryptsetup")?;
    stdin
        .write_all(b"\n")
        .structured(Kind::Fatal, "failed to write passphrase to cryptsetup")?;
    drop(stdin);
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) -> Result<(), TridentError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .structured(Kind::Fatal, "failed to restrict keyfile permissions")
}
