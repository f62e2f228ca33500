//! Immutable, content-addressed compiled artifacts.
//!
//! A [`CompiledArtifact`] pins everything that determines runtime behavior
//! for a signature: the winning params, the content hashes of the contract
//! it was compiled against, the evaluation evidence, and provenance. The
//! `compiled_id` is the canonical hash of that bundle with `created_at`
//! excluded — a documented normalization rule, not a hash of the full
//! artifact JSON — so recompiling identical content at a different time
//! yields the same id.

use chrono::{DateTime, Utc};
use dse_state::ContentHash;
use serde::{Deserialize, Serialize};

use crate::domain::digest::compute_hash;
use crate::domain::error::{DseError, Result};
use crate::domain::eval::EvalSummary;
use crate::domain::params::Params;

/// Content hashes of the contract the artifact was compiled against.
///
/// `rendered_prompt_hash` is mandatory: it is part of the eval cache key,
/// and an optional field there would make cache hits depend on which
/// compiler produced the artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHashes {
    pub input_schema_hash: ContentHash,
    pub output_schema_hash: ContentHash,
    pub prompt_ir_hash: ContentHash,
    pub params_hash: ContentHash,
    pub rendered_prompt_hash: ContentHash,
}

/// Which optimizer produced the winning params.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerProvenance {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

/// Build provenance. All fields here are hash-relevant; volatile data
/// (timestamps) lives on the artifact itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provenance {
    pub compiler_version: String,
    pub created_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// An immutable compiled artifact. Any content change produces a new
/// `compiled_id`; rows are never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub signature_id: String,
    pub compiled_id: ContentHash,
    /// Volatile; excluded from the `compiled_id` hash input.
    pub created_at: DateTime<Utc>,
    pub hashes: ArtifactHashes,
    pub params: Params,
    pub eval: EvalSummary,
    pub optimizer: OptimizerProvenance,
    pub provenance: Provenance,
}

impl CompiledArtifact {
    /// Compute the content-addressed id for an artifact's hash-relevant
    /// fields. `created_at` is deliberately absent from the input.
    pub fn compute_compiled_id(
        signature_id: &str,
        params: &Params,
        hashes: &ArtifactHashes,
        eval: &EvalSummary,
        optimizer: &OptimizerProvenance,
        provenance: &Provenance,
    ) -> Result<ContentHash> {
        compute_hash(&serde_json::json!({
            "signature_id": signature_id,
            "params": params,
            "hashes": hashes,
            "eval": eval,
            "optimizer": optimizer,
            "provenance": provenance,
        }))
    }

    /// Assemble an artifact, computing its id and stamping `created_at`.
    pub fn assemble(
        signature_id: impl Into<String>,
        params: Params,
        hashes: ArtifactHashes,
        eval: EvalSummary,
        optimizer: OptimizerProvenance,
        provenance: Provenance,
    ) -> Result<Self> {
        let signature_id = signature_id.into();
        let compiled_id = Self::compute_compiled_id(
            &signature_id,
            &params,
            &hashes,
            &eval,
            &optimizer,
            &provenance,
        )?;
        Ok(Self {
            signature_id,
            compiled_id,
            created_at: Utc::now(),
            hashes,
            params,
            eval,
            optimizer,
            provenance,
        })
    }

    /// Recompute the id from content and verify it matches the stored one.
    pub fn verify_id(&self) -> Result<()> {
        let recomputed = Self::compute_compiled_id(
            &self.signature_id,
            &self.params,
            &self.hashes,
            &self.eval,
            &self.optimizer,
            &self.provenance,
        )?;
        if recomputed != self.compiled_id {
            return Err(DseError::ArtifactConflict {
                signature_id: self.signature_id.clone(),
                compiled_id: self.compiled_id.as_str().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_hashes() -> ArtifactHashes {
        ArtifactHashes {
            input_schema_hash: ContentHash::from_bytes(b"in"),
            output_schema_hash: ContentHash::from_bytes(b"out"),
            prompt_ir_hash: ContentHash::from_bytes(b"ir"),
            params_hash: ContentHash::from_bytes(b"params"),
            rendered_prompt_hash: ContentHash::from_bytes(b"rendered"),
        }
    }

    fn make_artifact() -> CompiledArtifact {
        CompiledArtifact::assemble(
            "qa/Answer.v1",
            Params::new(),
            make_hashes(),
            EvalSummary::new("ds", "metric", 100, 0.9),
            OptimizerProvenance {
                id: "grid.v1".to_string(),
                config: None,
                iterations: Some(8),
            },
            Provenance {
                compiler_version: "0.1.0".to_string(),
                created_by: "test".to_string(),
                git_sha: None,
                notes: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_compiled_id_excludes_created_at() {
        let a = make_artifact();
        let mut b = a.clone();
        b.created_at = b.created_at + chrono::Duration::hours(5);
        assert_eq!(a.compiled_id, b.compiled_id);
        b.verify_id().unwrap();
    }

    #[test]
    fn test_compiled_id_changes_with_params() {
        let a = make_artifact();
        let mut b = a.clone();
        b.params.strategy = Some(crate::domain::params::StrategyParams {
            id: "rlm_lite.v1".to_string(),
        });
        let recomputed = CompiledArtifact::compute_compiled_id(
            &b.signature_id,
            &b.params,
            &b.hashes,
            &b.eval,
            &b.optimizer,
            &b.provenance,
        )
        .unwrap();
        assert_ne!(a.compiled_id, recomputed);
    }

    #[test]
    fn test_verify_id_detects_tampering() {
        let mut artifact = make_artifact();
        artifact.eval.mean_score = 0.99;
        match artifact.verify_id() {
            Err(DseError::ArtifactConflict { .. }) => {}
            other => panic!("expected ArtifactConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_artifact_serde_roundtrip() {
        let artifact = make_artifact();
        let json = serde_json::to_string(&artifact).unwrap();
        let back: CompiledArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(artifact, back);
    }

    #[test]
    fn test_assemble_is_deterministic_modulo_timestamp() {
        let a = make_artifact();
        let b = make_artifact();
        assert_eq!(a.compiled_id, b.compiled_id);
    }
}
