//! Install and update pipelines. Both share the middle
//! of their pipeline — crypto setup, extraction, config rendering,
//! bootloader install — through the helpers in this module and in
//! [`crate::extractor`], [`crate::config_render`], [`crate::bootloader`].

pub mod context;
pub mod install;
pub mod update;

pub use context::{CryptoSecret, InstallOptions, UpdateOptions};

use std::path::PathBuf;

use trident_api::{CryptoEnvelope, Kind, PartitionInfo, ReportError, TridentError};

use osutils::{blkid, encryption};

/// The device node the rest of the pipeline should address a partition by:
/// its LUKS mapper path if an envelope was opened for it, otherwise its raw
/// partition node.
pub fn active_device_for(info: &PartitionInfo, envelopes: &[CryptoEnvelope]) -> PathBuf {
    CryptoEnvelope::mapper_name_for(info.role)
        .and_then(|name| envelopes.iter().find(|e| e.mapper_name == name))
        .map(|e| e.mapper_path())
        .unwrap_or_else(|| info.node.clone())
}

/// Format, open, and optionally TPM2-enroll fresh LUKS envelopes across the
/// given partitions setup crypto on partitions
/// 2-4"). If opening any envelope fails, every envelope already opened in
/// this call is closed before the error propagates.
pub fn open_new_envelopes(
    infos: &[&PartitionInfo],
    secret: &str,
    tpm2: bool,
) -> Result<Vec<CryptoEnvelope>, TridentError> {
    let mut envelopes = Vec::new();
    for info in infos {
        match open_one_new_envelope(info, secret, tpm2) {
            Ok(envelope) => envelopes.push(envelope),
            Err(e) => {
                close_envelopes(&envelopes);
                return Err(e);
            }
        }
    }
    Ok(envelopes)
}

fn open_one_new_envelope(
    info: &PartitionInfo,
    secret: &str,
    tpm2: bool,
) -> Result<CryptoEnvelope, TridentError> {
    let mapper_name = CryptoEnvelope::mapper_name_for(info.role)
        .structured(Kind::Fatal, "the ESP has no LUKS mapper name")?
        .to_string();

    encryption::format(&info.node, secret)?;
    encryption::open(&info.node, &mapper_name, secret)?;
    if tpm2 {
        if let Err(e) = encryption::enroll_tpm2(&info.node, secret) {
            let _ = encryption::close(&mapper_name);
            return Err(e);
        }
    }

    let luks_uuid = blkid::filesystem_uuid(&info.node)?;
    Ok(CryptoEnvelope {
        partition: info.role,
        luks_uuid,
        mapper_name,
    })
}

/// Reopen a LUKS envelope created at install time. Only the TPM2 auto-unlock path is
/// supported here: the update command surface carries no
/// passphrase flag, so a non-TPM2-enrolled encrypted system cannot be
/// updated unattended (documented in `DESIGN.md`).
pub fn reopen_envelope(info: &PartitionInfo, mapper_name: &str, tpm2_enrolled: bool) -> Result<(), TridentError> {
    if !tpm2_enrolled {
        return Err(TridentError::new(
            Kind::Precondition,
            "updating an encrypted, non-TPM2-enrolled system requires the passphrase out of band; \
             the update command has no --passphrase flag",
        ));
    }
    encryption::open_tpm2(&info.node, mapper_name)
}

pub fn close_envelopes(envelopes: &[CryptoEnvelope]) {
    for envelope in envelopes {
        let _ = encryption::close(&envelope.mapper_name);
    }
}
