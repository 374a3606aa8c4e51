//! Remote-registry image source. A short-lived single-threaded
//! `tokio::runtime::Runtime` bridges `oci-client`'s async API into the
//! orchestrator's synchronous call chain, since nothing else in the
//! orchestrator needs to be async.

use std::io::Read;

use flate2::read::GzDecoder;
use oci_client::{
    client::{ClientConfig, ImageLayer},
    manifest::OciManifest as ClientManifest,
    secrets::RegistryAuth,
    Client, Reference,
};
use tokio::runtime::Runtime;
use trident_api::{ImageRef, Kind, ReportError, TridentError};

use super::{manifest::Descriptor, ImageSource, LayerReader, OciManifest};

pub struct RegistrySource {
    digest: String,
    manifest: OciManifest,
    layers: Vec<ImageLayer>,
}

impl RegistrySource {
    /// Resolve `image_ref` against its registry, pulling the manifest and
    /// every layer's bytes up front.
    pub fn pull(image_ref: &ImageRef) -> Result<Self, TridentError> {
        let reference = to_oci_reference(image_ref)?;
        let auth = credential_for(&reference);

        let rt = Runtime::new().structured(Kind::Fatal, "failed to start async runtime for registry pull")?;
        rt.block_on(async {
            let client = Client::new(ClientConfig::default());
            let (manifest, digest) = client
                .pull_image_manifest(&reference, &auth)
                .await
                .structured(Kind::Transient, format!("failed to pull manifest for {reference}"))?;

            let ClientManifest::Image(image_manifest) = manifest else {
                return Err(TridentError::new(
                    Kind::Corruption,
                    format!("{reference} resolved to a manifest list, not an image manifest"),
                ));
            };

            let layer_media_types: Vec<&str> = image_manifest
                .layers
                .iter()
                .map(|l| l.media_type.as_str())
                .collect();
            let data = client
                .pull(&reference, &auth, layer_media_types)
                .await
                .structured(Kind::Transient, format!("failed to pull layers for {reference}"))?;

            let manifest = OciManifest {
                schema_version: image_manifest.schema_version,
                config: Descriptor {
                    media_type: image_manifest.config.media_type.clone(),
                    digest: image_manifest.config.digest.clone(),
                    size: image_manifest.config.size as u64,
                },
                layers: image_manifest
                    .layers
                    .iter()
                    .map(|l| Descriptor {
                        media_type: l.media_type.clone(),
                        digest: l.digest.clone(),
                        size: l.size as u64,
                    })
                    .collect(),
            };

            Ok(RegistrySource {
                digest,
                manifest,
                layers: data.layers,
            })
        })
    }
}

impl ImageSource for RegistrySource {
    fn digest(&self) -> &str {
        &self.digest
    }

    fn manifest(&self) -> &OciManifest {
        &self.manifest
    }

    fn open_layer(&self, index: usize) -> Result<LayerReader, TridentError> {
        let layer = self.layers.get(index).structured(
            Kind::Corruption,
            format!("layer index {index} out of range"),
        )?;
        let descriptor = &self.manifest.layers[index];
        decompress(descriptor, layer.data.clone())
    }
}

fn decompress(descriptor: &Descriptor, bytes: Vec<u8>) -> Result<LayerReader, TridentError> {
    let cursor = std::io::Cursor::new(bytes);
    if descriptor.is_gzip_layer() {
        Ok(Box::new(GzDecoder::new(cursor)))
    } else if descriptor.is_zstd_layer() {
        let decoder = zstd::Decoder::new(cursor)
            .structured(Kind::Corruption, "failed to open zstd layer stream")?;
        Ok(Box::new(decoder))
    } else {
        Ok(Box::new(cursor) as Box<dyn Read>)
    }
}

fn to_oci_reference(image_ref: &ImageRef) -> Result<Reference, TridentError> {
    let raw = match image_ref {
        ImageRef::Tagged { registry, name, tag } => format!("{registry}/{name}:{tag}"),
        ImageRef::Digest { registry, name, digest } => format!("{registry}/{name}@{digest}"),
        ImageRef::Local(_) => {
            return Err(TridentError::new(
                Kind::OperatorError,
                "a local image path cannot be resolved against a registry",
            ))
        }
    };
    raw.parse()
        .structured(Kind::OperatorError, format!("invalid image reference '{raw}'"))
}

/// Resolve registry credentials from the default keychain. Anonymous when
/// none is configured, matching the behavior of an unauthenticated pull
/// against a public registry.
fn credential_for(reference: &Reference) -> RegistryAuth {
    docker_config_auth(reference).unwrap_or(RegistryAuth::Anonymous)
}

/// Best-effort read of `~/.docker/config.json`'s `auths` map, the same
/// place the Docker/Podman CLIs store `login` credentials.
fn docker_config_auth(reference: &Reference) -> Option<RegistryAuth> {
    let home = std::env::var_os("HOME")?;
    let config_path = std::path::Path::new(&home).join(".docker/config.json");
    let contents = std::fs::read(config_path).ok()?;
    let parsed: serde_json::Value = serde_json::from_slice(&contents).ok()?;
    let auths = parsed.get("auths")?.as_object()?;
    let entry = auths.get(reference.registry())?;
    let encoded = entry.get("auth")?.as_str()?;
    let decoded = String::from_utf8(base64_decode(encoded)?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some(RegistryAuth::Basic(user.to_string(), pass.to_string()))
}

/// Minimal standard-alphabet base64 decoder, avoiding a dedicated crate for
/// the one field (`auth`) the Docker config format base64-encodes.
fn base64_decode(input: &str) -> Option<Vec<u8>> {
    fn value(byte: u8) -> Option<u8> {
        match byte {
            b'A'..=b'Z' => Some(byte - b'A'),
            b'a'..=b'z' => Some(byte - b'a' + 26),
            b'0'..=b'9' => Some(byte - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let clean: Vec<u8> = input.bytes().filter(|&b| b != b'=' && !b.is_ascii_whitespace()).collect();
    let mut out = Vec::with_capacity(clean.len() * 3 / 4);
    for chunk in clean.chunks(4) {
        let vals: Vec<u8> = chunk.iter().map(|&b| value(b)).collect::<Option<Vec<u8>>>()?;
        let n = vals.len();
        if n < 2 {
            return None;
        }
        let combined = vals.iter().fold(0u32, |acc, &v| (acc << 6) | v as u32) << (6 * (4 - n));
        let bytes = combined.to_be_bytes();
        // `combined` fits in 24 bits, so `bytes[0]` is always the padding
        // byte from the `u32` representation; the `n - 1` decoded bytes
        // follow it.
        out.extend_from_slice(&bytes[1..n]);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decode_round_trips_a_known_value() {
        // "user:pass" base64-encoded.
        assert_eq!(base64_decode("dXNlcjpwYXNz").unwrap(), b"user:pass".to_vec());
    }
}
