//! Append-only trace of a kernel run.
//!
//! Each executed action appends one entry; at run end the trace is
//! canonically serialized and written to the blob store so the receipt can
//! reference it by content hash. Two identical runs yield the same trace
//! hash.

use dse_state::{BlobRef, BlobStore};
use serde::{Deserialize, Serialize};

use crate::domain::digest::canonical_json;
use crate::domain::error::{DseError, Result};
use crate::rlm::action::Action;

/// One executed action and its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// 1-based position in the run.
    pub seq: u64,
    pub action: Action,
    pub result: serde_json::Value,
}

/// The full trace of one kernel run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTrace {
    pub run_id: String,
    pub signature_id: String,
    pub entries: Vec<TraceEntry>,
}

impl RunTrace {
    pub fn new(run_id: impl Into<String>, signature_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            signature_id: signature_id.into(),
            entries: Vec::new(),
        }
    }

    /// Append the next entry, numbering it after the current tail.
    pub fn push(&mut self, action: Action, result: serde_json::Value) {
        let seq = self.entries.len() as u64 + 1;
        self.entries.push(TraceEntry {
            seq,
            action,
            result,
        });
    }

    /// Canonical serialized form; the stored bytes and the hash input.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let text = canonical_json(&serde_json::to_value(self)?)?;
        Ok(text.into_bytes())
    }

    /// Persist the trace and return its blob reference.
    pub async fn store(&self, blob_store: &dyn BlobStore) -> Result<BlobRef> {
        let bytes = self.canonical_bytes()?;
        blob_store.put(&bytes).await.map_err(DseError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dse_state::fakes::MemoryBlobStore;
    use serde_json::json;

    fn sample_trace() -> RunTrace {
        let mut trace = RunTrace::new("run-1", "qa/Answer.v1");
        trace.push(
            Action::Load {
                var: "doc".to_string(),
            },
            json!({"text": "hello"}),
        );
        trace.push(
            Action::Final {
                output: json!({"answer": "hello"}),
            },
            json!({"ok": true}),
        );
        trace
    }

    #[test]
    fn test_push_numbers_sequentially_from_one() {
        let trace = sample_trace();
        let seqs: Vec<_> = trace.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn test_canonical_bytes_deterministic() {
        let a = sample_trace();
        let b = sample_trace();
        assert_eq!(a.canonical_bytes().unwrap(), b.canonical_bytes().unwrap());
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = MemoryBlobStore::new();
        let trace = sample_trace();
        let blob = trace.store(&store).await.unwrap();
        let bytes = store.get(&blob.hash).await.unwrap();
        let back: RunTrace = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(trace, back);
    }
}
