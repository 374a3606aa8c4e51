//! EFI boot entry management: listing entries,
//! creating one, and setting the default boot order.

use std::process::Command;

use regex::Regex;
use trident_api::{Kind, ReportError, TridentError};

use crate::exe::RunAndCheck;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EfiBootEntry {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EfiBootManagerOutput {
    pub boot_current: Option<String>,
    pub boot_order: Vec<String>,
    pub entries: Vec<EfiBootEntry>,
}

pub fn list() -> Result<EfiBootManagerOutput, TridentError> {
    let raw = Command::new("efibootmgr")
        .output_and_check()
        .structured(Kind::Precondition, "failed to run efibootmgr")?;
    parse(&raw)
}

fn parse(output: &str) -> Result<EfiBootManagerOutput, TridentError> {
    let entry_pattern = Regex::new(r"^Boot([0-9A-Fa-f]{4})\*? (.+)$")
        .structured(Kind::Fatal, "invalid efibootmgr entry regex")?;

    let mut result = EfiBootManagerOutput::default();
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("BootCurrent:") {
            result.boot_current = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("BootOrder:") {
            result.boot_order = rest.trim().split(',').map(str::to_string).collect();
        } else if let Some(captures) = entry_pattern.captures(line.trim()) {
            result.entries.push(EfiBootEntry {
                id: captures[1].to_string(),
                label: captures[2].trim().to_string(),
            });
        }
    }
    Ok(result)
}

/// Register a new boot entry pointing at `loader_path` (relative to the
/// ESP root, e.g. `\EFI\BOOT\BOOTX64.EFI`) on `disk`/`partition_number`.
pub fn create_entry(
    disk: &str,
    partition_number: u32,
    label: &str,
    loader_path: &str,
) -> Result<(), TridentError> {
    Command::new("efibootmgr")
        .arg("--create")
        .arg("--disk")
        .arg(disk)
        .arg("--part")
        .arg(partition_number.to_string())
        .arg("--label")
        .arg(label)
        .arg("--loader")
        .arg(loader_path)
        .run_and_check()
        .structured(Kind::Fatal, format!("failed to create boot entry '{label}'"))
}

/// Move `boot_id` to the front of the boot order, preserving the rest.
pub fn set_first_boot_order(boot_id: &str, current: &EfiBootManagerOutput) -> Result<(), TridentError> {
    let mut order: Vec<&str> = vec![boot_id];
    order.extend(current.boot_order.iter().map(String::as_str).filter(|id| *id != boot_id));

    Command::new("efibootmgr")
        .arg("--bootorder")
        .arg(order.join(","))
        .run_and_check()
        .structured(Kind::Fatal, "failed to set EFI boot order")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "BootCurrent: 0001\nBootOrder: 0001,0000\nBoot0000* Windows Boot Manager\nBoot0001* nbc\n";

    #[test]
    fn parses_current_order_and_entries() {
        let parsed = parse(SAMPLE).unwrap();
        assert_eq!(parsed.boot_current.as_deref(), Some("0001"));
        assert_eq!(parsed.boot_order, vec!["0001", "0000"]);
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[1].label, "nbc");
    }

    #[test]
    fn set_first_boot_order_moves_id_to_front_and_dedupes() {
        let current = EfiBootManagerOutput {
            boot_current: None,
            boot_order: vec!["0000".into(), "0001".into()],
            entries: vec![],
        };
        let mut order: Vec<&str> = vec!["0001"];
        order.extend(
            current
                .boot_order
                .iter()
                .map(String::as_str)
                .filter(|id| *id != "0001"),
        );
        assert_eq!(order, vec!["0001", "0000"]);
    }
}
