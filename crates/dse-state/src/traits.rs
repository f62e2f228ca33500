//! Storage trait definitions for DSE.
//!
//! These traits define the core storage abstractions:
//! - `BlobStore`: content-addressed large-content storage (put/get by hash)
//! - `ArtifactStore`: immutable compiled-artifact rows keyed by
//!   `(signature_id, compiled_id)`
//! - `ActivePointerStore`: the single mutable cell per signature, updated
//!   with a compare-and-set discipline, backed by an append-only history
//! - `ReceiptSink`: write-once audit records of predict invocations
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentHash
// ---------------------------------------------------------------------------

/// Content hash in `sha256:<hex>` form.
///
/// The inner field is private to guarantee the string is always a valid
/// `sha256:`-prefixed lowercase hex digest produced by `from_bytes` or
/// validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ContentHash(String);

const HASH_PREFIX: &str = "sha256:";

impl ContentHash {
    /// Compute the SHA-256 hash of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(format!("{}{}", HASH_PREFIX, hex::encode(hasher.finalize())))
    }

    /// Return the full `sha256:<hex>` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex digest without the algorithm prefix.
    pub fn hex(&self) -> &str {
        &self.0[HASH_PREFIX.len()..]
    }

    /// Short form (first 12 hex chars) for log lines.
    pub fn short(&self) -> &str {
        &self.hex()[..12]
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let hex_part = match s.strip_prefix(HASH_PREFIX) {
            Some(h) => h,
            None => return Err(StorageError::InvalidHash { hash: s }),
        };
        if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidHash { hash: s });
        }
        Ok(ContentHash(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Reference to externally stored large content.
///
/// Carries enough metadata for preview policies to act without fetching
/// the blob itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Content hash of the blob.
    pub hash: ContentHash,
    /// Size of the stored content in bytes.
    pub size_bytes: u64,
    /// Optional media type hint (e.g. `"text/plain"`).
    pub media_type: Option<String>,
}

/// Content-addressed blob store.
///
/// Guarantees:
/// - `put(data)` always returns a ref whose hash is the SHA-256 of `data`.
/// - `get(hash)` returns the exact bytes previously stored.
/// - Same content always yields the same hash (deduplication).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return a reference to them.
    async fn put(&self, data: &[u8]) -> StorageResult<BlobRef>;

    /// Retrieve bytes by hash. Returns `StorageError::BlobNotFound` if absent.
    async fn get(&self, hash: &ContentHash) -> StorageResult<Vec<u8>>;

    /// Check whether a hash exists in the store.
    async fn contains(&self, hash: &ContentHash) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Immutable storage of compiled-artifact rows.
///
/// Rows are keyed by `(signature_id, compiled_id)` and never updated in
/// place; a changed artifact is a new row under a new `compiled_id`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Insert a new row. Returns `StorageError::ArtifactExists` if the key
    /// is already present (callers decide whether that is a conflict or an
    /// idempotent re-put by comparing content).
    async fn insert(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
        artifact_json: serde_json::Value,
    ) -> StorageResult<()>;

    /// Fetch a row. Returns `StorageError::ArtifactNotFound` if absent.
    async fn get(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
    ) -> StorageResult<serde_json::Value>;

    /// Check whether a row exists.
    async fn exists(&self, signature_id: &str, compiled_id: &ContentHash) -> StorageResult<bool>;

    /// List all compiled ids stored for a signature, in insertion order.
    async fn list_for_signature(&self, signature_id: &str) -> StorageResult<Vec<ContentHash>>;
}

// ---------------------------------------------------------------------------
// ActivePointerStore
// ---------------------------------------------------------------------------

/// One entry in the append-only history of pointer changes for a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerChange {
    /// Value the pointer was set to.
    pub compiled_id: ContentHash,
    /// When the change was applied.
    pub changed_at: DateTime<Utc>,
}

/// The single mutable cell per signature: `signature_id -> compiled_id`.
///
/// Writes are conditional (compare-and-set) so that concurrent promotions to
/// the same signature cannot interleave into a corrupt pointer. Every
/// successful write is appended to a per-signature history, which is what
/// makes rollback possible.
#[async_trait]
pub trait ActivePointerStore: Send + Sync {
    /// Current pointer value, if any.
    async fn get_active(&self, signature_id: &str) -> StorageResult<Option<ContentHash>>;

    /// Set the pointer to `new` only if the current value equals `expected`.
    /// Returns `StorageError::PointerConflict` if the condition fails.
    async fn compare_and_set_active(
        &self,
        signature_id: &str,
        expected: Option<&ContentHash>,
        new: &ContentHash,
    ) -> StorageResult<()>;

    /// Full append-only change history, oldest first.
    async fn history(&self, signature_id: &str) -> StorageResult<Vec<PointerChange>>;
}

// ---------------------------------------------------------------------------
// ReceiptSink
// ---------------------------------------------------------------------------

/// A persisted receipt row. The body is the serialized receipt produced by
/// the predict engine; the envelope fields exist for keyed retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptRow {
    /// Run id (unique per predict invocation).
    pub run_id: String,
    /// Signature the invocation targeted.
    pub signature_id: String,
    /// Serialized receipt body.
    pub body: serde_json::Value,
    /// When the receipt was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Write-once sink for predict receipts.
#[async_trait]
pub trait ReceiptSink: Send + Sync {
    /// Record a receipt. Exactly one receipt is expected per run id.
    async fn record(&self, row: ReceiptRow) -> StorageResult<()>;

    /// Fetch a receipt by run id.
    async fn get(&self, run_id: &str) -> StorageResult<ReceiptRow>;
}

// ---------------------------------------------------------------------------
// Forwarding impls
// ---------------------------------------------------------------------------
// A shared backend can be borrowed into several front-end APIs at once.

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for &T {
    async fn put(&self, data: &[u8]) -> StorageResult<BlobRef> {
        (**self).put(data).await
    }

    async fn get(&self, hash: &ContentHash) -> StorageResult<Vec<u8>> {
        (**self).get(hash).await
    }

    async fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
        (**self).contains(hash).await
    }
}

#[async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for &T {
    async fn insert(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
        artifact_json: serde_json::Value,
    ) -> StorageResult<()> {
        (**self).insert(signature_id, compiled_id, artifact_json).await
    }

    async fn get(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
    ) -> StorageResult<serde_json::Value> {
        (**self).get(signature_id, compiled_id).await
    }

    async fn exists(&self, signature_id: &str, compiled_id: &ContentHash) -> StorageResult<bool> {
        (**self).exists(signature_id, compiled_id).await
    }

    async fn list_for_signature(&self, signature_id: &str) -> StorageResult<Vec<ContentHash>> {
        (**self).list_for_signature(signature_id).await
    }
}

#[async_trait]
impl<T: ActivePointerStore + ?Sized> ActivePointerStore for &T {
    async fn get_active(&self, signature_id: &str) -> StorageResult<Option<ContentHash>> {
        (**self).get_active(signature_id).await
    }

    async fn compare_and_set_active(
        &self,
        signature_id: &str,
        expected: Option<&ContentHash>,
        new: &ContentHash,
    ) -> StorageResult<()> {
        (**self)
            .compare_and_set_active(signature_id, expected, new)
            .await
    }

    async fn history(&self, signature_id: &str) -> StorageResult<Vec<PointerChange>> {
        (**self).history(signature_id).await
    }
}

#[async_trait]
impl<T: ReceiptSink + ?Sized> ReceiptSink for &T {
    async fn record(&self, row: ReceiptRow) -> StorageResult<()> {
        (**self).record(row).await
    }

    async fn get(&self, run_id: &str) -> StorageResult<ReceiptRow> {
        (**self).get(run_id).await
    }
}
