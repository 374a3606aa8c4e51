//! Content-addressed OCI layout cache. Each purpose
//! (`staged-install`, `staged-update`) gets its own subdirectory; entries
//! are keyed by image digest, with a `metadata.json` sidecar recording the
//! original reference, pull time, and byte size. Mutating operations take
//! the shared cache lock; `list` is a read and does not.

use std::{fs, path::PathBuf};

use trident_api::{CacheEntry, CachePurpose, Kind, ReportError, TridentError};

use crate::lock::cache_lock;

const SIDECAR_NAME: &str = "metadata.json";
const LAYOUT_DIR_NAME: &str = "layout";

pub struct Cache {
    root: PathBuf,
}

impl Default for Cache {
    fn default() -> Self {
        Cache {
            root: PathBuf::from(trident_api::constants::CACHE_ROOT),
        }
    }
}

impl Cache {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Cache { root: root.into() }
    }

    fn purpose_dir(&self, purpose: CachePurpose) -> PathBuf {
        self.root.join(purpose.dir_name())
    }

    /// Directory a digest's entry is keyed under. Digests contain a `:`
    /// (e.g. `sha256:abcd`), which is not a valid path separator-free
    /// component on every filesystem, so it is replaced with `-`.
    fn entry_dir(&self, purpose: CachePurpose, digest: &str) -> PathBuf {
        self.purpose_dir(purpose).join(sanitize_digest(digest))
    }

    /// Directory the raw OCI layout is stored under within an entry.
    pub fn layout_dir(&self, purpose: CachePurpose, digest: &str) -> PathBuf {
        self.entry_dir(purpose, digest).join(LAYOUT_DIR_NAME)
    }

    /// Register a cache entry. `populate` is called with the freshly
    /// created (empty) layout directory and is responsible for writing the
    /// OCI layout's contents into it; this keeps the lock held for exactly
    /// as long as the mutation takes.
    pub fn add(
        &self,
        purpose: CachePurpose,
        entry: CacheEntry,
        populate: impl FnOnce(&std::path::Path) -> Result<(), TridentError>,
    ) -> Result<(), TridentError> {
        let _lock = cache_lock()?;

        let entry_dir = self.entry_dir(purpose, &entry.digest);
        let layout_dir = entry_dir.join(LAYOUT_DIR_NAME);
        fs::create_dir_all(&layout_dir)
            .structured(Kind::Fatal, "failed to create cache entry directory")?;

        populate(&layout_dir)?;

        let sidecar = serde_json::to_vec_pretty(&entry)
            .structured(Kind::Fatal, "failed to encode cache sidecar metadata")?;
        fs::write(entry_dir.join(SIDECAR_NAME), sidecar)
            .structured(Kind::Fatal, "failed to write cache sidecar metadata")
    }

    /// Look up a cache entry by digest. A mismatch between the sidecar's
    /// recorded digest and the directory key is treated as `Corruption`
    /// and the entry is removed.
    pub fn get(
        &self,
        purpose: CachePurpose,
        digest: &str,
    ) -> Result<Option<(CacheEntry, PathBuf)>, TridentError> {
        let entry_dir = self.entry_dir(purpose, digest);
        let sidecar_path = entry_dir.join(SIDECAR_NAME);
        if !sidecar_path.is_file() {
            return Ok(None);
        }

        let bytes = fs::read(&sidecar_path)
            .structured(Kind::Fatal, "failed to read cache sidecar metadata")?;
        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .structured(Kind::Corruption, "failed to parse cache sidecar metadata")?;

        if entry.digest != digest {
            let _lock = cache_lock()?;
            let _ = fs::remove_dir_all(&entry_dir);
            return Err(TridentError::new(
                Kind::Corruption,
                format!(
                    "cache entry at {} is keyed {digest} but its sidecar records {}",
                    entry_dir.display(),
                    entry.digest
                ),
            ));
        }

        Ok(Some((entry, entry_dir.join(LAYOUT_DIR_NAME))))
    }

    /// List every entry under `purpose`. Does not take the cache lock.
    pub fn list(&self, purpose: CachePurpose) -> Result<Vec<CacheEntry>, TridentError> {
        let dir = self.purpose_dir(purpose);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for child in
            fs::read_dir(&dir).structured(Kind::Fatal, "failed to list cache directory")?
        {
            let child = child.structured(Kind::Fatal, "failed to read cache directory entry")?;
            let sidecar = child.path().join(SIDECAR_NAME);
            if let Ok(bytes) = fs::read(&sidecar) {
                if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) {
                    entries.push(entry);
                }
            }
        }
        Ok(entries)
    }

    pub fn remove(&self, purpose: CachePurpose, digest: &str) -> Result<(), TridentError> {
        let _lock = cache_lock()?;
        let entry_dir = self.entry_dir(purpose, digest);
        if entry_dir.is_dir() {
            fs::remove_dir_all(&entry_dir)
                .structured(Kind::Fatal, "failed to remove cache entry")?;
        }
        Ok(())
    }

    pub fn clear(&self, purpose: CachePurpose) -> Result<(), TridentError> {
        let _lock = cache_lock()?;
        let dir = self.purpose_dir(purpose);
        if dir.is_dir() {
            fs::remove_dir_all(&dir).structured(Kind::Fatal, "failed to clear cache directory")?;
        }
        Ok(())
    }
}

fn sanitize_digest(digest: &str) -> String {
    digest.replace([':', '/'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(digest: &str) -> CacheEntry {
        CacheEntry {
            digest: digest.to_string(),
            image_reference: "example/os:latest".into(),
            pulled_at: "2026-01-01T00:00:00Z".into(),
            size_bytes: 1024,
        }
    }

    #[test]
    fn add_then_get_returns_the_same_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path());
        cache
            .add(CachePurpose::Install, sample_entry("sha256:aaaa"), |layout| {
                fs::write(layout.join("index.json"), b"{}")
                    .structured(Kind::Fatal, "write index.json")
            })
            .unwrap();

        let (entry, layout_dir) = cache.get(CachePurpose::Install, "sha256:aaaa").unwrap().unwrap();
        assert_eq!(entry, sample_entry("sha256:aaaa"));
        assert!(layout_dir.join("index.json").is_file());
    }

    #[test]
    fn missing_entry_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path());
        assert!(cache.get(CachePurpose::Update, "sha256:bbbb").unwrap().is_none());
    }

    #[test]
    fn list_sees_entries_added_under_the_same_purpose() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path());
        cache
            .add(CachePurpose::Install, sample_entry("sha256:aaaa"), |_| Ok(()))
            .unwrap();
        cache
            .add(CachePurpose::Install, sample_entry("sha256:bbbb"), |_| Ok(()))
            .unwrap();
        let mut digests: Vec<String> = cache
            .list(CachePurpose::Install)
            .unwrap()
            .into_iter()
            .map(|e| e.digest)
            .collect();
        digests.sort();
        assert_eq!(digests, vec!["sha256:aaaa".to_string(), "sha256:bbbb".to_string()]);
    }

    #[test]
    fn remove_deletes_the_entry_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path());
        cache
            .add(CachePurpose::Update, sample_entry("sha256:cccc"), |_| Ok(()))
            .unwrap();
        cache.remove(CachePurpose::Update, "sha256:cccc").unwrap();
        assert!(cache.get(CachePurpose::Update, "sha256:cccc").unwrap().is_none());
    }

    #[test]
    fn digest_mismatch_is_corruption_and_evicts_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::at(dir.path());
        cache
            .add(CachePurpose::Install, sample_entry("sha256:aaaa"), |_| Ok(()))
            .unwrap();

        // Corrupt the sidecar so its recorded digest no longer matches the
        // directory it lives under.
        let entry_dir = cache.entry_dir(CachePurpose::Install, "sha256:aaaa");
        fs::write(
            entry_dir.join(SIDECAR_NAME),
            serde_json::to_vec(&sample_entry("sha256:zzzz")).unwrap(),
        )
        .unwrap();

        let err = cache.get(CachePurpose::Install, "sha256:aaaa").unwrap_err();
        assert_eq!(err.kind(), Kind::Corruption);
        assert!(!entry_dir.exists());
    }
}
