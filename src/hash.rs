use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// SHA-256 of a file's bytes, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Short hex digest of an arbitrary string, used to disambiguate shortened names.
pub fn short_digest(text: &str, len: usize) -> String {
    let digest = hex::encode(Sha256::digest(text.as_bytes()));
    digest[..len.min(digest.len())].to_string()
}

/// Per-run memo of content hashes keyed by absolute path.
///
/// Entries are never invalidated; the trees being compared are assumed to be
/// a stable snapshot for the lifetime of the run.
#[derive(Debug, Default)]
pub struct ContentHasher {
    memo: DashMap<PathBuf, String>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(&self, path: &Path) -> io::Result<String> {
        let key = absolute(path);
        if let Some(hit) = self.memo.get(&key) {
            return Ok(hit.clone());
        }
        let digest = hash_file(&key)?;
        self.memo.insert(key, digest.clone());
        Ok(digest)
    }

    pub fn is_memoized(&self, path: &Path) -> bool {
        self.memo.contains_key(&absolute(path))
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn hash_matches_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn memo_survives_file_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dll");
        fs::write(&path, b"first").unwrap();

        let hasher = ContentHasher::new();
        let first = hasher.hash(&path).unwrap();
        fs::write(&path, b"second").unwrap();

        assert_eq!(hasher.hash(&path).unwrap(), first);
        assert!(hasher.is_memoized(&path));
        assert_eq!(hasher.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error_and_not_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.dll");
        let hasher = ContentHasher::new();
        assert!(hasher.hash(&path).is_err());
        assert!(hasher.is_empty());
    }

    #[test]
    fn short_digest_is_truncated() {
        assert_eq!(short_digest("abc", 8).len(), 8);
        assert_ne!(short_digest("abc", 8), short_digest("abd", 8));
    }
}
