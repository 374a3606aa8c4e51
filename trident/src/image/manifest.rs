//! Minimal OCI Image Manifest / Image Layout types: just enough to walk a
//! manifest's layer list in order and resolve the content-addressed blob
//! for each one.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
}

impl Descriptor {
    /// The blob's path relative to the OCI layout root, e.g.
    /// `blobs/sha256/<hash>`.
    pub fn blob_path(&self) -> String {
        let (algo, hash) = self.digest.split_once(':').unwrap_or(("sha256", &self.digest));
        format!("blobs/{algo}/{hash}")
    }

    pub fn is_gzip_layer(&self) -> bool {
        self.media_type.ends_with("tar+gzip")
    }

    pub fn is_zstd_layer(&self) -> bool {
        self.media_type.ends_with("tar+zstd")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OciManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// `index.json` at the root of an OCI Image Layout directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageIndex {
    pub manifests: Vec<Descriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_path_splits_algorithm_and_hash() {
        let d = Descriptor {
            media_type: "application/vnd.oci.image.layer.v1.tar+gzip".into(),
            digest: "sha256:abcd1234".into(),
            size: 10,
        };
        assert_eq!(d.blob_path(), "blobs/sha256/abcd1234");
        assert!(d.is_gzip_layer());
        assert!(!d.is_zstd_layer());
    }
}
