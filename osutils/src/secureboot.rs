//! Secure Boot shim chain assembly: `shim` is staged
//! as the fallback loader name the firmware boots automatically, the real
//! bootloader is staged under the name shim expects to chain-load, and the
//! MOK manager is staged alongside. `fbx64.efi` is deliberately never
//! written — its presence would let the firmware fall back to an
//! unverified loader, defeating the chain.

use std::path::Path;

use trident_api::{Kind, ReportError, TridentError};

use crate::path::rename_case_sensitive;

/// Names of the three files a shim-chained Secure Boot install stages
/// under `EFI/BOOT/` on the ESP, keyed by architecture.
pub struct ShimChainNames {
    pub fallback_loader: &'static str,
    pub real_loader: &'static str,
    pub mok_manager: &'static str,
}

pub fn shim_chain_names(arch: sysdefs::SystemArchitecture) -> ShimChainNames {
    match arch {
        sysdefs::SystemArchitecture::Amd64 => ShimChainNames {
            fallback_loader: "BOOTX64.EFI",
            real_loader: "grubx64.efi",
            mok_manager: "mmx64.efi",
        },
        sysdefs::SystemArchitecture::Aarch64 => ShimChainNames {
            fallback_loader: "BOOTAA64.EFI",
            real_loader: "grubaa64.efi",
            mok_manager: "mmaa64.efi",
        },
    }
}

/// Stage the three shim-chain files into `boot_dir` (normally
/// `<esp>/EFI/BOOT`), copying from already-installed source paths. Refuses
/// to create an `fbx64.efi`/`fbaa64.efi` fallback loader under any
/// circumstance — callers must not pass one in.
pub fn stage_chain(
    boot_dir: &Path,
    arch: sysdefs::SystemArchitecture,
    shim_src: &Path,
    grub_src: &Path,
    mok_manager_src: &Path,
) -> Result<(), TridentError> {
    let names = shim_chain_names(arch);
    std::fs::copy(shim_src, boot_dir.join(names.fallback_loader))
        .structured(Kind::Fatal, "failed to stage shim as fallback loader")?;
    std::fs::copy(grub_src, boot_dir.join(names.real_loader))
        .structured(Kind::Fatal, "failed to stage real bootloader for shim chain")?;
    std::fs::copy(mok_manager_src, boot_dir.join(names.mok_manager))
        .structured(Kind::Fatal, "failed to stage MOK manager")?;
    Ok(())
}

/// FAT32 is case-insensitive for lookups but case-preserving for storage;
/// renaming `EFI/Boot` to `EFI/BOOT` (or similar) in one step can silently
/// no-op on some drivers. Two-step through a scratch name avoids that.
pub fn ensure_upper_case_boot_dir(esp_root: &Path) -> Result<std::path::PathBuf, TridentError> {
    let efi_dir = esp_root.join("EFI");
    let current = efi_dir.join("Boot");
    let target = efi_dir.join("BOOT");
    if current.exists() && current != target {
        rename_case_sensitive(&current, &target)?;
    }
    if !target.exists() {
        std::fs::create_dir_all(&target)
            .structured(Kind::Fatal, "failed to create EFI/BOOT directory")?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amd64_names_exclude_fallback_loader_alias() {
        let names = shim_chain_names(sysdefs::SystemArchitecture::Amd64);
        assert_eq!(names.fallback_loader, "BOOTX64.EFI");
        assert_ne!(names.fallback_loader, "fbx64.efi");
        assert_ne!(names.real_loader, "fbx64.efi");
        assert_ne!(names.mok_manager, "fbx64.efi");
    }

    #[test]
    fn aarch64_names_use_aa64_suffix() {
        let names = shim_chain_names(sysdefs::SystemArchitecture::Aarch64);
        assert_eq!(names.fallback_loader, "BOOTAA64.EFI");
        assert_eq!(names.real_loader, "grubaa64.efi");
    }
}
