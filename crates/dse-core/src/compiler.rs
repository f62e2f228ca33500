//! Compilation: evaluate candidate params, pin the winner in an artifact.
//!
//! The search space is an explicit candidate list; whatever proposed it
//! (grid, human, an external optimizer) stays outside this boundary. The
//! compiler's job is narrower: evaluate each candidate through the
//! [`CandidateEvaluator`] collaborator, reject failures without storing
//! anything, and assemble a [`CompiledArtifact`] for the best survivor.

use async_trait::async_trait;
use dse_state::{BlobStore, ContentHash};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::{ArtifactHashes, CompiledArtifact, OptimizerProvenance, Provenance};
use crate::domain::error::{DseError, Result};
use crate::domain::eval::EvalSummary;
use crate::domain::params::Params;
use crate::domain::signature::Signature;
use crate::render::{render, rendered_prompt_hash, RenderContext};

/// Explicit candidate list to evaluate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub candidates: Vec<Params>,
}

/// One compile request.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub search_space: SearchSpace,
    pub optimizer: OptimizerProvenance,
    pub provenance: Provenance,
    /// Representative input used to pin `rendered_prompt_hash`.
    pub sample_input: serde_json::Value,
}

/// Evaluation collaborator: scores one candidate against a dataset.
#[async_trait]
pub trait CandidateEvaluator: Send + Sync {
    async fn evaluate(&self, signature: &Signature, params: &Params) -> Result<EvalSummary>;
}

/// A candidate whose evaluation failed. Recorded, never stored.
#[derive(Debug)]
pub struct RejectedCandidate {
    pub index: usize,
    pub params_hash: ContentHash,
    pub reason: String,
}

/// Result of a compile run.
pub struct CompileOutcome {
    pub artifact: CompiledArtifact,
    pub rejected: Vec<RejectedCandidate>,
}

/// Evaluate every candidate and assemble an artifact for the best one.
///
/// Candidates are merged over the signature's default params before
/// evaluation, so the artifact pins the full effective parameter set.
/// Ties on `mean_score` keep the earliest candidate.
pub async fn compile(
    signature: &Signature,
    job: &CompileJob,
    evaluator: &dyn CandidateEvaluator,
    blob_store: &dyn BlobStore,
) -> Result<CompileOutcome> {
    let mut rejected = Vec::new();
    let mut best: Option<(Params, EvalSummary)> = None;

    for (index, candidate) in job.search_space.candidates.iter().enumerate() {
        let effective = candidate.merge_over(&signature.defaults.params);
        let params_hash = effective.params_hash()?;

        match evaluator.evaluate(signature, &effective).await {
            Ok(eval) => {
                tracing::info!(
                    signature_id = %signature.id,
                    candidate = index,
                    params_hash = %params_hash.short(),
                    mean_score = eval.mean_score,
                    "candidate evaluated"
                );
                let better = match &best {
                    Some((_, current)) => eval.mean_score > current.mean_score,
                    None => true,
                };
                if better {
                    best = Some((effective, eval));
                }
            }
            Err(e) => {
                tracing::warn!(
                    signature_id = %signature.id,
                    candidate = index,
                    params_hash = %params_hash.short(),
                    reason = %e,
                    "candidate rejected"
                );
                rejected.push(RejectedCandidate {
                    index,
                    params_hash,
                    reason: e.to_string(),
                });
            }
        }
    }

    let (params, eval) = best.ok_or_else(|| {
        DseError::Contract(format!(
            "compile produced no accepted candidate for {}",
            signature.id
        ))
    })?;

    let variants = signature.instruction_variants();
    let messages = render(
        &signature.prompt_ir,
        &params,
        &RenderContext {
            input: &job.sample_input,
            variants: &variants,
            blob_store,
        },
    )
    .await?;

    let hashes = ArtifactHashes {
        input_schema_hash: signature.input_schema_hash()?,
        output_schema_hash: signature.output_schema_hash()?,
        prompt_ir_hash: signature.prompt_ir.ir_hash()?,
        params_hash: params.params_hash()?,
        rendered_prompt_hash: rendered_prompt_hash(&messages)?,
    };

    let artifact = CompiledArtifact::assemble(
        signature.id.clone(),
        params,
        hashes,
        eval,
        job.optimizer.clone(),
        job.provenance.clone(),
    )?;
    tracing::info!(
        signature_id = %signature.id,
        compiled_id = %artifact.compiled_id.short(),
        rejected = rejected.len(),
        "compile finished"
    );

    Ok(CompileOutcome { artifact, rejected })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{DecodeMode, DecodeParams, StrategyParams};
    use crate::domain::prompt_ir::{PromptBlock, PromptIr};
    use crate::domain::signature::SignatureDefaults;
    use dse_state::fakes::MemoryBlobStore;
    use serde_json::json;

    /// Scores candidates by a fixed script; `None` entries fail evaluation.
    struct ScriptedEvaluator {
        scores: Vec<Option<f64>>,
        next: std::sync::Mutex<usize>,
    }

    impl ScriptedEvaluator {
        fn new(scores: Vec<Option<f64>>) -> Self {
            Self {
                scores,
                next: std::sync::Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl CandidateEvaluator for ScriptedEvaluator {
        async fn evaluate(&self, _signature: &Signature, _params: &Params) -> Result<EvalSummary> {
            let mut next = self.next.lock().unwrap();
            let slot = self.scores[*next];
            *next += 1;
            match slot {
                Some(score) => Ok(EvalSummary::new("ds", "exact_match", 20, score)),
                None => Err(DseError::LmCall("evaluation run failed".to_string())),
            }
        }
    }

    fn make_signature() -> Signature {
        let mut defaults = SignatureDefaults::default();
        defaults.params.decode = Some(DecodeParams {
            mode: DecodeMode::StrictJson,
            max_repairs: 0,
        });
        Signature::new(
            "qa/Answer.v1",
            json!({"type": "object"}),
            json!({"type": "object"}),
            PromptIr::new(vec![PromptBlock::System {
                text: "Answer.".to_string(),
            }]),
            defaults,
        )
        .unwrap()
    }

    fn candidate(strategy: &str) -> Params {
        let mut p = Params::new();
        p.strategy = Some(StrategyParams {
            id: strategy.to_string(),
        });
        p
    }

    fn make_job(candidates: Vec<Params>) -> CompileJob {
        CompileJob {
            search_space: SearchSpace { candidates },
            optimizer: OptimizerProvenance {
                id: "grid.v1".to_string(),
                config: None,
                iterations: None,
            },
            provenance: Provenance::default(),
            sample_input: json!({"q": "example"}),
        }
    }

    #[tokio::test]
    async fn test_best_candidate_wins() {
        let signature = make_signature();
        let job = make_job(vec![candidate("direct.v1"), candidate("rlm_lite.v1")]);
        let evaluator = ScriptedEvaluator::new(vec![Some(0.6), Some(0.9)]);
        let store = MemoryBlobStore::new();

        let outcome = compile(&signature, &job, &evaluator, &store).await.unwrap();
        assert_eq!(outcome.artifact.params.strategy_id(), "rlm_lite.v1");
        assert_eq!(outcome.artifact.eval.mean_score, 0.9);
        assert!(outcome.rejected.is_empty());
        outcome.artifact.verify_id().unwrap();
    }

    #[tokio::test]
    async fn test_failed_candidate_rejected_not_fatal() {
        let signature = make_signature();
        let job = make_job(vec![candidate("direct.v1"), candidate("rlm_lite.v1")]);
        let evaluator = ScriptedEvaluator::new(vec![None, Some(0.7)]);
        let store = MemoryBlobStore::new();

        let outcome = compile(&signature, &job, &evaluator, &store).await.unwrap();
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].index, 0);
        assert_eq!(outcome.artifact.params.strategy_id(), "rlm_lite.v1");
    }

    #[tokio::test]
    async fn test_all_candidates_rejected_is_an_error() {
        let signature = make_signature();
        let job = make_job(vec![candidate("direct.v1")]);
        let evaluator = ScriptedEvaluator::new(vec![None]);
        let store = MemoryBlobStore::new();

        assert!(matches!(
            compile(&signature, &job, &evaluator, &store).await,
            Err(DseError::Contract(_))
        ));
    }

    #[tokio::test]
    async fn test_artifact_pins_effective_params() {
        // The winner's decode section is unset, so the signature default
        // must show up in the pinned params.
        let signature = make_signature();
        let job = make_job(vec![candidate("direct.v1")]);
        let evaluator = ScriptedEvaluator::new(vec![Some(0.5)]);
        let store = MemoryBlobStore::new();

        let outcome = compile(&signature, &job, &evaluator, &store).await.unwrap();
        assert_eq!(
            outcome.artifact.params.decode.as_ref().unwrap().mode,
            DecodeMode::StrictJson
        );
        assert_eq!(
            outcome.artifact.hashes.params_hash,
            outcome.artifact.params.params_hash().unwrap()
        );
    }

    #[tokio::test]
    async fn test_tie_keeps_earliest_candidate() {
        let signature = make_signature();
        let job = make_job(vec![candidate("direct.v1"), candidate("rlm_lite.v1")]);
        let evaluator = ScriptedEvaluator::new(vec![Some(0.8), Some(0.8)]);
        let store = MemoryBlobStore::new();

        let outcome = compile(&signature, &job, &evaluator, &store).await.unwrap();
        assert_eq!(outcome.artifact.params.strategy_id(), "direct.v1");
    }
}
