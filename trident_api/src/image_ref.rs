//! [`ImageRef`] — an OCI reference in any of its supported forms: a remote
//! registry reference, a local OCI Image Layout directory, or a reference
//! resolved through a local container daemon.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// `registry/name:tag`, or `name:tag` against the default registry.
    Tagged { registry: String, name: String, tag: String },
    /// `name@sha256:...`.
    Digest { registry: String, name: String, digest: String },
    /// A filesystem path to an OCI image layout directory.
    Local(PathBuf),
}

impl ImageRef {
    /// Parse a `--image` argument. A value that exists as a local path is
    /// treated as an OCI layout directory; otherwise it is parsed as a
    /// registry reference.
    pub fn parse(raw: &str) -> Result<ImageRef, String> {
        if raw.starts_with('/') || raw.starts_with("./") || raw.starts_with("../") {
            return Ok(ImageRef::Local(PathBuf::from(raw)));
        }

        if let Some((name_part, digest)) = raw.split_once('@') {
            let (registry, name) = split_registry(name_part);
            return Ok(ImageRef::Digest {
                registry,
                name,
                digest: digest.to_string(),
            });
        }

        // A tag, if present, is the part after the last ':' that is not
        // itself part of a port number in the registry host (registry hosts
        // with a port look like "host:5000/name:tag" — only split on a ':'
        // that appears after the last '/').
        let last_slash = raw.rfind('/').unwrap_or(0);
        if let Some(colon) = raw[last_slash..].rfind(':') {
            let split_at = last_slash + colon;
            let (name_part, tag) = raw.split_at(split_at);
            let tag = &tag[1..];
            let (registry, name) = split_registry(name_part);
            return Ok(ImageRef::Tagged {
                registry,
                name,
                tag: tag.to_string(),
            });
        }

        let (registry, name) = split_registry(raw);
        Ok(ImageRef::Tagged {
            registry,
            name,
            tag: "latest".to_string(),
        })
    }

    pub fn registry(&self) -> Option<&str> {
        match self {
            ImageRef::Tagged { registry, .. } | ImageRef::Digest { registry, .. } => {
                Some(registry)
            }
            ImageRef::Local(_) => None,
        }
    }

    pub fn repository(&self) -> Option<&str> {
        match self {
            ImageRef::Tagged { name, .. } | ImageRef::Digest { name, .. } => Some(name),
            ImageRef::Local(_) => None,
        }
    }
}

fn split_registry(name_part: &str) -> (String, String) {
    match name_part.split_once('/') {
        Some((maybe_registry, rest))
            if maybe_registry.contains('.') || maybe_registry.contains(':') || maybe_registry == "localhost" =>
        {
            (maybe_registry.to_string(), rest.to_string())
        }
        _ => ("docker.io".to_string(), name_part.to_string()),
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageRef::Tagged { registry, name, tag } => write!(f, "{registry}/{name}:{tag}"),
            ImageRef::Digest { registry, name, digest } => write!(f, "{registry}/{name}@{digest}"),
            ImageRef::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_reference() {
        let r = ImageRef::parse("example/os:stable").unwrap();
        assert_eq!(
            r,
            ImageRef::Tagged {
                registry: "docker.io".into(),
                name: "example/os".into(),
                tag: "stable".into()
            }
        );
    }

    #[test]
    fn parses_digest_reference() {
        let r = ImageRef::parse("example/os@sha256:aaaa").unwrap();
        assert_eq!(
            r,
            ImageRef::Digest {
                registry: "docker.io".into(),
                name: "example/os".into(),
                digest: "sha256:aaaa".into()
            }
        );
    }

    #[test]
    fn parses_registry_with_port() {
        let r = ImageRef::parse("registry.example.com:5000/team/os:v1").unwrap();
        assert_eq!(
            r,
            ImageRef::Tagged {
                registry: "registry.example.com:5000".into(),
                name: "team/os".into(),
                tag: "v1".into()
            }
        );
    }

    #[test]
    fn parses_localhost_reference() {
        let r = ImageRef::parse("localhost/os:dev").unwrap();
        assert_eq!(
            r,
            ImageRef::Tagged {
                registry: "localhost".into(),
                name: "os".into(),
                tag: "dev".into()
            }
        );
    }

    #[test]
    fn parses_local_layout_path() {
        let r = ImageRef::parse("/var/cache/nbc/staged-install/abc").unwrap();
        assert_eq!(r, ImageRef::Local(PathBuf::from("/var/cache/nbc/staged-install/abc")));
    }

    #[test]
    fn defaults_to_latest_tag() {
        let r = ImageRef::parse("example/os").unwrap();
        assert_eq!(
            r,
            ImageRef::Tagged {
                registry: "docker.io".into(),
                name: "example/os".into(),
                tag: "latest".into()
            }
        );
    }
}
