//! Data model and error taxonomy shared by every other crate in the
//! workspace: the entities (`Device`, `PartitionLayout`, `CryptoEnvelope`,
//! `ImageRef`, `CacheEntry`, `SystemState`) plus the `TridentError`/`Kind`
//! pair every fallible operation in the orchestrator returns.

pub mod cache;
pub mod constants;
pub mod crypto;
pub mod device;
pub mod error;
pub mod image_ref;
pub mod partition;
pub mod status;

pub use cache::{CacheEntry, CachePurpose};
pub use crypto::CryptoEnvelope;
pub use device::{Device, DeviceKind};
pub use error::{Kind, ReportError, TridentError, TridentResultExt};
pub use image_ref::ImageRef;
pub use partition::{PartitionInfo, PartitionLayout, PartitionRole};
pub use status::{BootloaderKind, CryptoConfigSnapshot, SystemState};
