//! On-disk memoization of listing results.
//!
//! Entries never expire; a hit is reported at warn level so a stale listing
//! is noticed. Call [`ListingCache::clear`] to start over.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use cloudio_common::{StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct ListingCache {
    dir: PathBuf,
}

impl ListingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key: SHA-256 of the operation name and its arguments.
    pub fn key(operation: &str, args: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        for arg in args {
            // Separator keeps ("ab", "c") distinct from ("a", "bc").
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Return the cached value for `operation(args)`, computing and storing
    /// it on a miss. Errors from `compute` are not cached.
    pub fn get_or_insert_with<T, F>(&self, operation: &str, args: &[&str], compute: F) -> StorageResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> StorageResult<T>,
    {
        let key = Self::key(operation, args);
        let path = self.entry_path(&key);

        match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice(&raw) {
                Ok(value) => {
                    info!(operation = %operation, key = %key, "Listing cache hit");
                    warn!(operation = %operation, "Cached listing may be stale; clear the cache to refresh it");
                    return Ok(value);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Discarding unreadable cache entry");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let value = compute()?;
        std::fs::create_dir_all(&self.dir)?;
        let encoded = serde_json::to_vec(&value)
            .map_err(|e| StorageError::Backend(anyhow::Error::new(e).context("Failed to encode cache entry")))?;
        std::fs::write(&path, encoded)?;
        debug!(operation = %operation, key = %key, "Listing cached");
        Ok(value)
    }

    /// Delete every cached entry.
    pub fn clear(&self) -> StorageResult<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
