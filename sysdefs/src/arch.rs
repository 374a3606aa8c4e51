use strum_macros::IntoStaticStr;

/// Host CPU architecture, used to pick the right GRUB EFI target name and
/// shim binary name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum SystemArchitecture {
    #[strum(serialize = "amd64")]
    Amd64,
    #[strum(serialize = "arm64")]
    Aarch64,
}

impl SystemArchitecture {
    pub fn current() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            SystemArchitecture::Amd64
        }
        #[cfg(target_arch = "aarch64")]
        {
            SystemArchitecture::Aarch64
        }
    }

    /// GRUB's own name for the platform's EFI target, e.g. `x86_64-efi`.
    pub fn grub_target(&self) -> &'static str {
        match self {
            SystemArchitecture::Amd64 => "x86_64-efi",
            SystemArchitecture::Aarch64 => "arm64-efi",
        }
    }

    /// Name of the `BOOT<ARCH>.EFI` fallback loader the firmware probes for.
    pub fn efi_fallback_name(&self) -> &'static str {
        match self {
            SystemArchitecture::Amd64 => "BOOTX64.EFI",
            SystemArchitecture::Aarch64 => "BOOTAA64.EFI",
        }
    }

    /// Name used by `grub-install --target`.
    pub fn efi_install_target(&self) -> &'static str {
        match self {
            SystemArchitecture::Amd64 => "x86_64-efi",
            SystemArchitecture::Aarch64 => "arm64-efi",
        }
    }
}
