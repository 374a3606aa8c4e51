//! Local OCI Image Layout directory source: random-access
//! reads directly off disk, used both for `--via-loopback`-style offline
//! installs and for images already staged in the cache.

use std::{fs::File, io::Read, path::{Path, PathBuf}};

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use trident_api::{Kind, ReportError, TridentError};

use super::{
    manifest::{Descriptor, ImageIndex},
    ImageSource, LayerReader, OciManifest,
};

pub struct LocalLayoutSource {
    root: PathBuf,
    digest: String,
    manifest: OciManifest,
}

impl LocalLayoutSource {
    /// Open an OCI Image Layout directory rooted at `root`. Reads
    /// `index.json` to find the single image manifest, then the manifest
    /// itself from its blob.
    pub fn open(root: &Path) -> Result<Self, TridentError> {
        let index_path = root.join("index.json");
        let index_bytes = std::fs::read(&index_path).structured(
            Kind::OperatorError,
            format!("{} is not an OCI image layout (no index.json)", root.display()),
        )?;
        let index: ImageIndex = serde_json::from_slice(&index_bytes)
            .structured(Kind::Corruption, "failed to parse index.json")?;

        let manifest_descriptor = index
            .manifests
            .first()
            .structured(Kind::Corruption, "index.json lists no manifests")?;
        let digest = manifest_descriptor.digest.clone();

        let manifest_path = root.join(manifest_descriptor.blob_path());
        let manifest_bytes = std::fs::read(&manifest_path).structured(
            Kind::Corruption,
            format!("missing manifest blob at {}", manifest_path.display()),
        )?;
        verify_digest(&manifest_bytes, &digest)?;
        let manifest: OciManifest = serde_json::from_slice(&manifest_bytes)
            .structured(Kind::Corruption, "failed to parse image manifest")?;

        Ok(LocalLayoutSource {
            root: root.to_path_buf(),
            digest,
            manifest,
        })
    }
}

impl ImageSource for LocalLayoutSource {
    fn digest(&self) -> &str {
        &self.digest
    }

    fn manifest(&self) -> &OciManifest {
        &self.manifest
    }

    fn open_layer(&self, index: usize) -> Result<LayerReader, TridentError> {
        let descriptor = self
            .manifest
            .layers
            .get(index)
            .structured(Kind::Corruption, format!("layer index {index} out of range"))?;
        open_blob(&self.root, descriptor)
    }
}

fn open_blob(root: &Path, descriptor: &Descriptor) -> Result<LayerReader, TridentError> {
    let path = root.join(descriptor.blob_path());
    let file = File::open(&path).structured(
        Kind::Corruption,
        format!("missing layer blob at {}", path.display()),
    )?;

    if descriptor.is_gzip_layer() {
        Ok(Box::new(GzDecoder::new(file)))
    } else if descriptor.is_zstd_layer() {
        let decoder = zstd::Decoder::new(file)
            .structured(Kind::Corruption, "failed to open zstd layer stream")?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(file) as Box<dyn Read>)
    }
}

/// Verify a blob's bytes hash to the digest its descriptor claims.
fn verify_digest(bytes: &[u8], digest: &str) -> Result<(), TridentError> {
    let (algo, expected_hex) = digest.split_once(':').structured(
        Kind::Corruption,
        format!("malformed digest '{digest}'"),
    )?;
    if algo != "sha256" {
        return Err(TridentError::new(
            Kind::Corruption,
            format!("unsupported digest algorithm '{algo}'"),
        ));
    }
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let actual = hex::encode(hasher.finalize());
    if actual != expected_hex {
        return Err(TridentError::new(
            Kind::Corruption,
            format!("blob digest mismatch: expected {expected_hex}, got {actual}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_layout(dir: &Path) -> (String, String) {
        std::fs::create_dir_all(dir.join("blobs/sha256")).unwrap();

        let layer_bytes = b"not a real tar but stands in for one";
        let layer_digest = format!("sha256:{}", {
            let mut h = Sha256::new();
            h.update(layer_bytes);
            hex::encode(h.finalize())
        });
        std::fs::write(
            dir.join("blobs/sha256").join(layer_digest.trim_start_matches("sha256:")),
            layer_bytes,
        )
        .unwrap();

        let manifest = OciManifest {
            schema_version: 2,
            config: Descriptor {
                media_type: "application/vnd.oci.image.config.v1+json".into(),
                digest: "sha256:0000000000000000000000000000000000000000000000000000000000000000"
                    .into(),
                size: 2,
            },
            layers: vec![Descriptor {
                media_type: "application/vnd.oci.image.layer.v1.tar".into(),
                digest: layer_digest.clone(),
                size: layer_bytes.len() as u64,
            }],
        };
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = format!("sha256:{}", {
            let mut h = Sha256::new();
            h.update(&manifest_bytes);
            hex::encode(h.finalize())
        });
        std::fs::write(
            dir.join("blobs/sha256")
                .join(manifest_digest.trim_start_matches("sha256:")),
            &manifest_bytes,
        )
        .unwrap();

        let index = ImageIndex {
            manifests: vec![Descriptor {
                media_type: "application/vnd.oci.image.manifest.v1+json".into(),
                digest: manifest_digest.clone(),
                size: manifest_bytes.len() as u64,
            }],
        };
        let mut index_file = std::fs::File::create(dir.join("index.json")).unwrap();
        index_file.write_all(&serde_json::to_vec(&index).unwrap()).unwrap();

        (manifest_digest, layer_digest)
    }

    #[test]
    fn opens_and_reads_layer_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (manifest_digest, _layer_digest) = write_layout(dir.path());

        let source = LocalLayoutSource::open(dir.path()).unwrap();
        assert_eq!(source.digest(), manifest_digest);
        assert_eq!(source.manifest().layers.len(), 1);

        let mut reader = source.open_layer(0).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"not a real tar but stands in for one");
    }

    #[test]
    fn rejects_a_directory_that_is_not_an_oci_layout() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalLayoutSource::open(dir.path()).unwrap_err();
        assert_eq!(err.kind(), Kind::OperatorError);
    }
}
