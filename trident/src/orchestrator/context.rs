//! Shared option structs for the install and update pipelines.
//! Parsed and validated once at the top of each pipeline so every later
//! step can assume its inputs are well-formed.

use std::{fs, path::PathBuf};

use sysdefs::RootFileSystemType;
use trident_api::{ImageRef, Kind, ReportError, TridentError};

/// Where the passphrase protecting a LUKS envelope comes from. Resolved to a plain string once, early,
/// so the rest of the pipeline only ever handles a `&str`.
#[derive(Debug, Clone)]
pub enum CryptoSecret {
    Passphrase(String),
    Keyfile(PathBuf),
}

impl CryptoSecret {
    pub fn resolve(&self) -> Result<String, TridentError> {
        match self {
            CryptoSecret::Passphrase(p) => Ok(p.clone()),
            CryptoSecret::Keyfile(path) => {
                let contents = fs::read_to_string(path).structured(
                    Kind::OperatorError,
                    format!("failed to read keyfile {}", path.display()),
                )?;
                Ok(contents.trim_end_matches(['\n', '\r']).to_string())
            }
        }
    }
}

/// `install <image> <device>` options.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub image: ImageRef,
    pub device: PathBuf,
    pub filesystem: RootFileSystemType,
    pub encrypt: bool,
    pub secret: Option<CryptoSecret>,
    pub tpm2: bool,
    pub root_password: Option<String>,
    pub via_loopback: Option<PathBuf>,
    pub image_size_bytes: Option<u64>,
    pub kargs: Vec<String>,
    pub force: bool,
    pub dry_run: bool,
}

impl InstallOptions {
    /// Operator-error validation: catches
    /// contradictory or incomplete flag combinations before anything is
    /// touched on disk.
    pub fn validate(&self) -> Result<(), TridentError> {
        if self.encrypt && self.secret.is_none() {
            return Err(TridentError::new(
                Kind::OperatorError,
                "--encrypt requires --passphrase or --keyfile",
            ));
        }
        if self.tpm2 && !self.encrypt {
            return Err(TridentError::new(
                Kind::OperatorError,
                "--tpm2 requires --encrypt",
            ));
        }
        if self.via_loopback.is_some() && self.image_size_bytes.is_none() {
            return Err(TridentError::new(
                Kind::OperatorError,
                "--via-loopback requires --image-size",
            ));
        }
        Ok(())
    }
}

/// `update` options.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub image: Option<ImageRef>,
    pub device: Option<PathBuf>,
    pub check: bool,
    pub download_only: bool,
    pub local_image: bool,
    pub auto: bool,
    pub skip_pull: bool,
    pub force: bool,
    pub kargs: Vec<String>,
}

impl UpdateOptions {
    pub fn validate(&self) -> Result<(), TridentError> {
        if self.image.is_none() && !self.auto {
            return Err(TridentError::new(
                Kind::OperatorError,
                "update requires --image unless --auto is given",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_install() -> InstallOptions {
        InstallOptions {
            image: ImageRef::parse("example/os:latest").unwrap(),
            device: PathBuf::from("/dev/sdb"),
            filesystem: RootFileSystemType::Ext4,
            encrypt: false,
            secret: None,
            tpm2: false,
            root_password: None,
            via_loopback: None,
            image_size_bytes: None,
            kargs: vec![],
            force: false,
            dry_run: false,
        }
    }

    #[test]
    fn encrypt_without_secret_is_rejected() {
        let mut opts = base_install();
        opts.encrypt = true;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn tpm2_without_encrypt_is_rejected() {
        let mut opts = base_install();
        opts.tpm2 = true;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn loopback_without_image_size_is_rejected() {
        let mut opts = base_install();
        opts.via_loopback = Some(PathBuf::from("/tmp/disk.img"));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn keyfile_secret_is_trimmed_of_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key");
        fs::write(&path, "hunter2\n").unwrap();
        let secret = CryptoSecret::Keyfile(path);
        assert_eq!(secret.resolve().unwrap(), "hunter2");
    }

    #[test]
    fn update_requires_image_unless_auto() {
        let opts = UpdateOptions::default();
        assert!(opts.validate().is_err());
        let auto = UpdateOptions { auto: true, ..Default::default() };
        assert!(auto.validate().is_ok());
    }
}
