//! Payload file format and cache.

use crate::error::{Result, VaultError};
use crate::types::ContentDigest;
use lru::LruCache;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Magic bytes for payload files.
const CONTENT_MAGIC: &[u8; 4] = b"BVC\0";

/// Current payload format version.
const CONTENT_VERSION: u8 = 1;

/// Content-addressed payload storage.
pub struct ContentStore {
    /// Base directory for payloads.
    path: PathBuf,

    /// Recently read or written payloads.
    cache: Mutex<LruCache<ContentDigest, Vec<u8>>>,
}

impl ContentStore {
    pub fn new(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let cache_size = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);

        Ok(Self {
            path,
            cache: Mutex::new(LruCache::new(cache_size)),
        })
    }

    /// Store a payload, returning its digest. Storing known content is a no-op.
    pub fn put(&self, content: &[u8]) -> Result<ContentDigest> {
        let digest = ContentDigest::from_bytes(content);
        if self.exists(&digest) {
            return Ok(digest);
        }

        fs::create_dir_all(self.shard_path(&digest))?;

        // Write beside the final name so a crash never leaves a torn payload.
        let final_path = self.content_path(&digest);
        let tmp_path = final_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(CONTENT_MAGIC)?;
            file.write_all(&[CONTENT_VERSION])?;
            file.write_all(&(content.len() as u64).to_le_bytes())?;
            file.write_all(content)?;
            file.write_all(&crc32fast::hash(content).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        debug!(digest = %digest, size = content.len(), "stored payload");

        self.cache.lock().put(digest, content.to_vec());
        Ok(digest)
    }

    /// Read a payload, verifying checksum and digest.
    pub fn get(&self, digest: &ContentDigest) -> Result<Option<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().get(digest).cloned() {
            return Ok(Some(cached));
        }

        let content_path = self.content_path(digest);
        if !content_path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&content_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != CONTENT_MAGIC {
            return Err(VaultError::InvalidFormat("Invalid payload magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != CONTENT_VERSION {
            return Err(VaultError::InvalidFormat(format!(
                "Unsupported payload version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut content = vec![0u8; len];
        file.read_exact(&mut content)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);
        let computed = crc32fast::hash(&content);
        if stored != computed {
            return Err(VaultError::Corruption(format!(
                "payload {} checksum mismatch: expected {}, got {}",
                digest, stored, computed
            )));
        }

        let actual = ContentDigest::from_bytes(&content);
        if &actual != digest {
            return Err(VaultError::Corruption(format!(
                "payload digest mismatch: expected {}, got {}",
                digest, actual
            )));
        }

        self.cache.lock().put(*digest, content.clone());
        Ok(Some(content))
    }

    pub fn exists(&self, digest: &ContentDigest) -> bool {
        if self.cache.lock().contains(digest) {
            return true;
        }
        self.content_path(digest).exists()
    }

    /// Every stored digest.
    pub fn list(&self) -> Result<Vec<ContentDigest>> {
        let mut digests = Vec::new();

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            for payload in fs::read_dir(entry.path())? {
                let payload = payload?;
                let name = payload.file_name();
                if let Ok(digest) = ContentDigest::from_hex(&name.to_string_lossy()) {
                    digests.push(digest);
                }
            }
        }

        Ok(digests)
    }

    /// Bytes used on disk by stored payloads.
    pub fn total_size(&self) -> Result<u64> {
        let mut total = 0u64;

        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                for payload in fs::read_dir(entry.path())? {
                    total += payload?.metadata()?.len();
                }
            }
        }

        Ok(total)
    }

    fn shard_path(&self, digest: &ContentDigest) -> PathBuf {
        self.path.join(digest.shard_prefix())
    }

    fn content_path(&self, digest: &ContentDigest) -> PathBuf {
        self.shard_path(digest).join(digest.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_and_get() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path().join("content"), 16).unwrap();

        let digest = store.put(b"fn main() {}").unwrap();
        assert_eq!(store.get(&digest).unwrap().unwrap(), b"fn main() {}");
        assert_eq!(digest, ContentDigest::from_bytes(b"fn main() {}"));
    }

    #[test]
    fn test_identical_content_stored_once() {
        let dir = TempDir::new().unwrap();
        let store = ContentStore::new(dir.path().join("content"), 16).unwrap();

        let d1 = store.put(b"same").unwrap();
        let d2 = store.put(b"same").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_get_bypasses_cold_cache() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content");

        let digest = {
            let store = ContentStore::new(&path, 16).unwrap();
            store.put(b"persisted").unwrap()
        };

        let store = ContentStore::new(&path, 16).unwrap();
        assert!(store.exists(&digest));
        assert_eq!(store.get(&digest).unwrap().unwrap(), b"persisted");
        assert!(store.get(&ContentDigest::from_bytes(b"missing")).unwrap().is_none());
    }

    #[test]
    fn test_tampered_payload_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("content");

        let digest = {
            let store = ContentStore::new(&path, 16).unwrap();
            store.put(b"original").unwrap()
        };

        let file = path.join(digest.shard_prefix()).join(digest.to_hex());
        let mut bytes = fs::read(&file).unwrap();
        bytes[13] ^= 0xff;
        fs::write(&file, bytes).unwrap();

        let store = ContentStore::new(&path, 16).unwrap();
        assert!(matches!(store.get(&digest), Err(VaultError::Corruption(_))));
    }
}
