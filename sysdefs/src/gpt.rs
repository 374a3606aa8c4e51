use uuid::Uuid;

/// GPT partition type GUIDs relevant to this installer. Root and var
/// partitions deliberately use the generic Linux data type rather than one
/// of the architecture-specific "discoverable root" types: the bootloader
/// names the active slot explicitly on the kernel command line, so
/// autodiscovery by partition type is not in play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GptPartitionType {
    EspSystem,
    LinuxGeneric,
}

impl GptPartitionType {
    pub fn type_guid(&self) -> Uuid {
        let s = match self {
            GptPartitionType::EspSystem => "c12a7328-f81f-11d2-ba4b-00a0c93ec93b",
            GptPartitionType::LinuxGeneric => "0fc63daf-8483-4772-8e79-3d69d8477de4",
        };
        Uuid::parse_str(s).expect("hardcoded GPT type GUID is valid")
    }

    /// The short code `sgdisk -t` accepts for this type.
    pub fn sgdisk_code(&self) -> &'static str {
        match self {
            GptPartitionType::EspSystem => "ef00",
            GptPartitionType::LinuxGeneric => "8300",
        }
    }
}
