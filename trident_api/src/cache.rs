//! [`CacheEntry`] — the sidecar metadata recorded alongside each
//! content-addressed OCI layout in the cache.

use serde::{Deserialize, Serialize};

/// Why a cache entry was staged; selects its containing directory
/// (`staged-install/` or `staged-update/`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePurpose {
    Install,
    Update,
}

impl CachePurpose {
    pub fn dir_name(&self) -> &'static str {
        match self {
            CachePurpose::Install => "staged-install",
            CachePurpose::Update => "staged-update",
        }
    }
}

/// Sidecar JSON stored next to each cached OCI layout, keyed by the image
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub digest: String,
    pub image_reference: String,
    pub pulled_at: String,
    pub size_bytes: u64,
}
