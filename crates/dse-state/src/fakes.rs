//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBlobStore`, `MemoryArtifactStore`, `MemoryPointerStore`,
//! and `MemoryReceiptSink` that satisfy the trait contracts without any
//! external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::traits::*;

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// In-memory content-addressed store backed by a `HashMap<hash, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: &[u8]) -> StorageResult<BlobRef> {
        let hash = ContentHash::from_bytes(data);
        let mut store = self.store.lock().unwrap();
        store.insert(hash.as_str().to_string(), data.to_vec());
        Ok(BlobRef {
            hash,
            size_bytes: data.len() as u64,
            media_type: None,
        })
    }

    async fn get(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        let store = self.store.lock().unwrap();
        store
            .get(hash.as_str())
            .cloned()
            .ok_or_else(|| StorageError::BlobNotFound {
                hash: hash.as_str().to_string(),
            })
    }

    async fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
        let store = self.store.lock().unwrap();
        Ok(store.contains_key(hash.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

/// In-memory artifact rows keyed by `(signature_id, compiled_id)`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    rows: Mutex<Vec<(String, ContentHash, serde_json::Value)>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn insert(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
        artifact_json: serde_json::Value,
    ) -> StorageResult<()> {
        let mut rows = self.rows.lock().unwrap();
        if rows
            .iter()
            .any(|(sig, id, _)| sig == signature_id && id == compiled_id)
        {
            return Err(StorageError::ArtifactExists {
                signature_id: signature_id.to_string(),
                compiled_id: compiled_id.as_str().to_string(),
            });
        }
        rows.push((
            signature_id.to_string(),
            compiled_id.clone(),
            artifact_json,
        ));
        Ok(())
    }

    async fn get(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
    ) -> StorageResult<serde_json::Value> {
        let rows = self.rows.lock().unwrap();
        rows.iter()
            .find(|(sig, id, _)| sig == signature_id && id == compiled_id)
            .map(|(_, _, json)| json.clone())
            .ok_or_else(|| StorageError::ArtifactNotFound {
                signature_id: signature_id.to_string(),
                compiled_id: compiled_id.as_str().to_string(),
            })
    }

    async fn exists(&self, signature_id: &str, compiled_id: &ContentHash) -> StorageResult<bool> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .any(|(sig, id, _)| sig == signature_id && id == compiled_id))
    }

    async fn list_for_signature(&self, signature_id: &str) -> StorageResult<Vec<ContentHash>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .iter()
            .filter(|(sig, _, _)| sig == signature_id)
            .map(|(_, id, _)| id.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryPointerStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PointerState {
    current: Option<ContentHash>,
    history: Vec<PointerChange>,
}

/// In-memory active-pointer table with per-signature append-only history.
#[derive(Debug, Default)]
pub struct MemoryPointerStore {
    pointers: Mutex<HashMap<String, PointerState>>,
}

impl MemoryPointerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActivePointerStore for MemoryPointerStore {
    async fn get_active(&self, signature_id: &str) -> StorageResult<Option<ContentHash>> {
        let pointers = self.pointers.lock().unwrap();
        Ok(pointers
            .get(signature_id)
            .and_then(|s| s.current.clone()))
    }

    async fn compare_and_set_active(
        &self,
        signature_id: &str,
        expected: Option<&ContentHash>,
        new: &ContentHash,
    ) -> StorageResult<()> {
        let mut pointers = self.pointers.lock().unwrap();
        let state = pointers.entry(signature_id.to_string()).or_default();
        if state.current.as_ref() != expected {
            return Err(StorageError::PointerConflict {
                signature_id: signature_id.to_string(),
                expected: expected.map(|h| h.as_str().to_string()),
                found: state.current.as_ref().map(|h| h.as_str().to_string()),
            });
        }
        state.current = Some(new.clone());
        state.history.push(PointerChange {
            compiled_id: new.clone(),
            changed_at: Utc::now(),
        });
        Ok(())
    }

    async fn history(&self, signature_id: &str) -> StorageResult<Vec<PointerChange>> {
        let pointers = self.pointers.lock().unwrap();
        Ok(pointers
            .get(signature_id)
            .map(|s| s.history.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryReceiptSink
// ---------------------------------------------------------------------------

/// In-memory receipt sink keyed by run id.
#[derive(Debug, Default)]
pub struct MemoryReceiptSink {
    receipts: Mutex<HashMap<String, ReceiptRow>>,
}

impl MemoryReceiptSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of receipts recorded so far.
    pub fn len(&self) -> usize {
        self.receipts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All recorded rows, in no particular order.
    pub fn rows(&self) -> Vec<ReceiptRow> {
        self.receipts.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl ReceiptSink for MemoryReceiptSink {
    async fn record(&self, row: ReceiptRow) -> StorageResult<()> {
        let mut receipts = self.receipts.lock().unwrap();
        receipts.insert(row.run_id.clone(), row);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> StorageResult<ReceiptRow> {
        let receipts = self.receipts.lock().unwrap();
        receipts
            .get(run_id)
            .cloned()
            .ok_or_else(|| StorageError::ReceiptNotFound {
                run_id: run_id.to_string(),
            })
    }
}
