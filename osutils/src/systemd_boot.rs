//! systemd-boot loader entries. These files are
//! small and fixed-shape enough to hand-format directly rather than run
//! through `tera`, which is reserved for the larger, more variable GRUB
//! config.

use std::path::Path;

use trident_api::{Kind, ReportError, TridentError};

/// Render one `loader/entries/{id}.conf` entry.
pub fn render_entry(title: &str, root_fs_uuid: &str, root_device: &str, cmdline: &str) -> String {
    format!(
        "title   {title}\nlinux   /vmlinuz\ninitrd  /initrd.img\noptions root={root_device} {cmdline}\n# root-fs-uuid={root_fs_uuid}\n"
    )
}

/// Render `loader/loader.conf`, selecting `default_id` as the default entry.
pub fn render_loader_conf(default_id: &str) -> String {
    format!("default {default_id}.conf\ntimeout 3\nconsole-mode auto\neditor no\n")
}

pub fn write_entry(
    entries_dir: &Path,
    id: &str,
    title: &str,
    root_fs_uuid: &str,
    root_device: &str,
    cmdline: &str,
) -> Result<(), TridentError> {
    let contents = render_entry(title, root_fs_uuid, root_device, cmdline);
    let path = entries_dir.join(format!("{id}.conf"));
    std::fs::write(&path, contents)
        .structured(Kind::Fatal, format!("failed to write loader entry {}", path.display()))
}

pub fn write_loader_conf(loader_dir: &Path, default_id: &str) -> Result<(), TridentError> {
    let path = loader_dir.join("loader.conf");
    std::fs::write(&path, render_loader_conf(default_id))
        .structured(Kind::Fatal, "failed to write loader.conf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_contains_root_device_and_cmdline() {
        let entry = render_entry("nbc (A)", "abcd-1234", "/dev/mapper/root1", "quiet");
        assert!(entry.contains("/dev/mapper/root1"));
        assert!(entry.contains("quiet"));
        assert!(entry.starts_with("title   nbc (A)\n"));
    }

    #[test]
    fn loader_conf_points_at_default_entry() {
        assert_eq!(
            render_loader_conf("nbc-a"),
            "default nbc-a.conf\ntimeout 3\nconsole-mode auto\neditor no\n"
        );
    }
}
