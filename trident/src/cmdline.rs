//! Kernel command-line synthesis. A pure function of its
//! inputs: equal inputs produce a byte-equal line, consumed identically by
//! the install and update orchestrators so both paths stay in lockstep.

use sysdefs::RootFileSystemType;
use trident_api::CryptoEnvelope;

/// Everything the cmdline builder needs to know. Carrying this as a plain
/// struct (rather than threading the orchestrator's full context) is what
/// makes the function pure and easy to unit-test in isolation.
#[derive(Debug, Clone)]
pub struct CmdlineInputs<'a> {
    /// Stable identifier for the active slot's root partition, or `None`
    /// when encryption is enabled (in which case the mapper path is used
    /// instead).
    pub root_device: &'a str,
    pub root_fstype: RootFileSystemType,
    /// Stable identifier for the `var` partition, or its mapper path.
    pub var_device: &'a str,
    pub crypto: &'a [CryptoEnvelope],
    pub tpm2_enrolled: bool,
    pub custom_args: &'a [String],
    pub console: Option<&'a str>,
    pub serial: Option<&'a str>,
}

/// Build the single kernel command-line string for the active slot. Mandatory elements appear in a fixed order so the output is
/// deterministic for equal inputs.
pub fn build(inputs: &CmdlineInputs) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(format!("root={}", inputs.root_device));
    parts.push(format!("rootfstype={}", inputs.root_fstype.fstab_name()));
    parts.push(format!(
        "systemd.mount-extra={}:/var:{}:defaults",
        inputs.var_device,
        inputs.root_fstype.fstab_name()
    ));

    for envelope in inputs.crypto {
        parts.push(format!("rd.luks.uuid={}", envelope.luks_uuid));
        if inputs.tpm2_enrolled {
            parts.push(format!(
                "rd.luks.options={}=tpm2-device=auto",
                envelope.luks_uuid
            ));
        }
    }

    parts.push("rd.etc.overlay=1".to_string());

    // NVMe multipath workaround: emitted unconditionally pending
    // migration of every persisted/kernel-visible path to a stable
    // by-id identifier.
    parts.push("nvme_core.multipath=N".to_string());

    if let Some(console) = inputs.console {
        parts.push(format!("console={console}"));
    }
    if let Some(serial) = inputs.serial {
        parts.push(format!("console={serial}"));
    }

    for arg in inputs.custom_args {
        parts.push(arg.clone());
    }

    parts.join(" ")
}
