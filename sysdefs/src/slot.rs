use serde::{Deserialize, Serialize};

/// One of the two root partitions in the A/B scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(&self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Device-mapper name used for this slot's LUKS mapping, when encrypted.
    pub fn mapper_name(&self) -> &'static str {
        match self {
            Slot::A => "root1",
            Slot::B => "root2",
        }
    }

    /// Suffix used for systemd-boot loader entry filenames and GRUB menu
    /// entry ids.
    pub fn letter(&self) -> &'static str {
        match self {
            Slot::A => "A",
            Slot::B => "B",
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.letter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn other_is_involutive() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other(), Slot::A);
        assert_eq!(Slot::A.other().other(), Slot::A);
    }
}
