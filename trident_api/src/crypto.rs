//! [`CryptoEnvelope`] — a LUKS2 container wrapping one protected partition.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::partition::PartitionRole;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoEnvelope {
    pub partition: PartitionRole,
    pub luks_uuid: Uuid,
    /// Device-mapper name: `root1`, `root2`, or `var`.
    pub mapper_name: String,
}

impl CryptoEnvelope {
    pub fn mapper_path(&self) -> PathBuf {
        PathBuf::from("/dev/mapper").join(&self.mapper_name)
    }

    /// The fixed mapper name for a given partition role. The boot partition
    /// is never encrypted and has no mapper name.
    pub fn mapper_name_for(role: PartitionRole) -> Option<&'static str> {
        match role {
            PartitionRole::Esp => None,
            PartitionRole::RootA => Some("root1"),
            PartitionRole::RootB => Some("root2"),
            PartitionRole::Var => Some("var"),
        }
    }

    /// One `crypttab` line for this envelope.
    pub fn crypttab_line(&self, tpm2: bool) -> String {
        if tpm2 {
            format!(
                "{} UUID={} none luks,tpm2-device=auto",
                self.mapper_name, self.luks_uuid
            )
        } else {
            format!("{} UUID={} none luks", self.mapper_name, self.luks_uuid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypttab_line_includes_tpm2_option_only_when_enrolled() {
        let env = CryptoEnvelope {
            partition: PartitionRole::RootA,
            luks_uuid: Uuid::nil(),
            mapper_name: "root1".into(),
        };
        assert_eq!(
            env.crypttab_line(false),
            "root1 UUID=00000000-0000-0000-0000-000000000000 none luks"
        );
        assert_eq!(
            env.crypttab_line(true),
            "root1 UUID=00000000-0000-0000-0000-000000000000 none luks,tpm2-device=auto"
        );
    }

    #[test]
    fn boot_partition_has_no_mapper_name() {
        assert_eq!(CryptoEnvelope::mapper_name_for(PartitionRole::Esp), None);
        assert_eq!(
            CryptoEnvelope::mapper_name_for(PartitionRole::Var),
            Some("var")
        );
    }
}
