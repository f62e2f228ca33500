//! Filesystem-backed blob store with git-style 2-char sharding.
//!
//! Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>`

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::traits::{BlobRef, BlobStore, ContentHash, StorageResult};

/// Filesystem-backed content-addressed blob store.
pub struct FsBlobStore {
    objects_dir: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates `root/objects/`
    /// if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let objects_dir = root.as_ref().join("objects");
        fs::create_dir_all(&objects_dir)?;
        Ok(Self { objects_dir })
    }

    fn blob_path(&self, hash: &ContentHash) -> PathBuf {
        let hex = hash.hex();
        self.objects_dir.join(&hex[..2]).join(&hex[2..])
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, data: &[u8]) -> StorageResult<BlobRef> {
        let hash = ContentHash::from_bytes(data);
        let path = self.blob_path(&hash);
        let size_bytes = data.len() as u64;

        if path.exists() {
            return Ok(BlobRef {
                hash,
                size_bytes,
                media_type: None,
            });
        }

        let shard_dir = path.parent().expect("blob path always has parent");
        fs::create_dir_all(shard_dir)?;

        // Atomic write: write to temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(data)?;
        tmp.persist(&path).map_err(|e| StorageError::Io(e.error))?;

        Ok(BlobRef {
            hash,
            size_bytes,
            media_type: None,
        })
    }

    async fn get(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(hash);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::BlobNotFound {
                    hash: hash.as_str().to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
        Ok(self.blob_path(hash).exists())
    }
}
