//! Artifact registry: immutable compiled rows plus the active pointer.
//!
//! The registry is the only path that writes artifacts or moves pointers.
//! Rows are write-once; activation and rollback go through the pointer
//! store's compare-and-set so concurrent promotions cannot interleave.

use dse_state::{ActivePointerStore, ArtifactStore, ContentHash, PointerChange, StorageError};

use crate::domain::artifact::CompiledArtifact;
use crate::domain::error::{DseError, Result};
use crate::obs;

/// Thin API layer over the artifact and pointer backends.
pub struct ArtifactRegistry<A, P> {
    artifacts: A,
    pointers: P,
}

impl<A, P> ArtifactRegistry<A, P>
where
    A: ArtifactStore,
    P: ActivePointerStore,
{
    pub fn new(artifacts: A, pointers: P) -> Self {
        Self { artifacts, pointers }
    }

    /// Store a compiled artifact. Re-putting an id that is already stored
    /// succeeds idempotently when the stored content verifies against the
    /// id; a row whose content does not match is a conflict.
    pub async fn put(&self, artifact: &CompiledArtifact) -> Result<()> {
        artifact.verify_id()?;
        let row = serde_json::to_value(artifact)?;
        match self
            .artifacts
            .insert(&artifact.signature_id, &artifact.compiled_id, row)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    signature_id = %artifact.signature_id,
                    compiled_id = %artifact.compiled_id.short(),
                    "artifact stored"
                );
                Ok(())
            }
            Err(StorageError::ArtifactExists { .. }) => {
                let stored = self
                    .get(&artifact.signature_id, &artifact.compiled_id)
                    .await?;
                // compiled_id covers every hash-relevant field, so a
                // verified row under the same id is the same artifact.
                let _ = stored;
                Ok(())
            }
            Err(e) => Err(DseError::Storage(e)),
        }
    }

    /// Fetch an artifact row and verify its id against its content.
    pub async fn get(
        &self,
        signature_id: &str,
        compiled_id: &ContentHash,
    ) -> Result<CompiledArtifact> {
        let row = self.artifacts.get(signature_id, compiled_id).await?;
        let artifact: CompiledArtifact = serde_json::from_value(row)?;
        artifact.verify_id()?;
        Ok(artifact)
    }

    /// All compiled ids stored for a signature, oldest first.
    pub async fn list(&self, signature_id: &str) -> Result<Vec<ContentHash>> {
        Ok(self.artifacts.list_for_signature(signature_id).await?)
    }

    /// Point the signature's active pointer at a stored artifact.
    pub async fn set_active(&self, signature_id: &str, compiled_id: &ContentHash) -> Result<()> {
        if !self.artifacts.exists(signature_id, compiled_id).await? {
            return Err(DseError::Storage(StorageError::ArtifactNotFound {
                signature_id: signature_id.to_string(),
                compiled_id: compiled_id.as_str().to_string(),
            }));
        }
        let current = self.pointers.get_active(signature_id).await?;
        self.pointers
            .compare_and_set_active(signature_id, current.as_ref(), compiled_id)
            .await?;
        obs::emit_pointer_moved(signature_id, compiled_id.as_str(), "promote");
        Ok(())
    }

    /// Current active pointer value, if any.
    pub async fn active_id(&self, signature_id: &str) -> Result<Option<ContentHash>> {
        Ok(self.pointers.get_active(signature_id).await?)
    }

    /// Resolve the active pointer to its artifact.
    pub async fn get_active(&self, signature_id: &str) -> Result<Option<CompiledArtifact>> {
        match self.pointers.get_active(signature_id).await? {
            Some(compiled_id) => Ok(Some(self.get(signature_id, &compiled_id).await?)),
            None => Ok(None),
        }
    }

    /// Move the active pointer back to the most recent distinct previous
    /// value. The rollback itself is appended to history, never rewrites it.
    pub async fn rollback(&self, signature_id: &str) -> Result<ContentHash> {
        let current = self
            .pointers
            .get_active(signature_id)
            .await?
            .ok_or_else(|| {
                DseError::Storage(StorageError::NoPreviousPointer {
                    signature_id: signature_id.to_string(),
                })
            })?;

        let history = self.pointers.history(signature_id).await?;
        let previous = history
            .iter()
            .rev()
            .map(|change| &change.compiled_id)
            .find(|id| **id != current)
            .cloned()
            .ok_or_else(|| {
                DseError::Storage(StorageError::NoPreviousPointer {
                    signature_id: signature_id.to_string(),
                })
            })?;

        self.pointers
            .compare_and_set_active(signature_id, Some(&current), &previous)
            .await?;
        obs::emit_pointer_moved(signature_id, previous.as_str(), "rollback");
        Ok(previous)
    }

    /// Append-only pointer history, oldest first.
    pub async fn pointer_history(&self, signature_id: &str) -> Result<Vec<PointerChange>> {
        Ok(self.pointers.history(signature_id).await?)
    }
}
