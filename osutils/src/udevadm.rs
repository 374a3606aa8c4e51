//! `udevadm settle` — waits for the kernel's newly-created partition device
//! nodes to appear before the orchestrator touches them.

use std::process::Command;

use trident_api::{Kind, ReportError, TridentError};

use crate::exe::RunAndCheck;

pub fn settle() -> Result<(), TridentError> {
    Command::new("udevadm")
        .arg("settle")
        .run_and_check()
        .structured(Kind::Transient, "udevadm settle failed")
}
