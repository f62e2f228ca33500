//! Versioned wire formats for cross-process exchange.
//!
//! Each DTO carries a `format` discriminator and an integer
//! `format_version`, and evolves additively: new optional fields only,
//! never renames or removals. Readers ignore fields they do not know,
//! which is what lets older runtimes consume exports from newer ones.

use serde::{Deserialize, Serialize};

use crate::compiler::{CompileJob, SearchSpace};
use crate::domain::artifact::{CompiledArtifact, OptimizerProvenance, Provenance};
use crate::domain::error::Result;
use crate::domain::eval::EvalSummary;
use crate::domain::params::Params;
use crate::domain::prompt_ir::PromptIr;
use crate::domain::signature::{Signature, SignatureConstraints};
use crate::tooling::ToolContract;

/// Current wire format version for all V1 DTOs.
pub const WIRE_VERSION_1: u32 = 1;

/// `format` value of [`SignatureContractExportV1`].
pub const SIGNATURE_CONTRACT_FORMAT: &str = "dse.signature_contract";
/// `format` value of [`CompileJobSpecV1`].
pub const COMPILE_JOB_FORMAT: &str = "dse.compile_job";

/// Exported signature contract: what a remote caller needs to invoke or
/// compile a signature without holding the runtime's own definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureContractExportV1 {
    pub format: String,
    pub format_version: u32,
    pub signature_id: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub prompt_ir: PromptIr,
    pub prompt_ir_hash: String,
    pub default_params: Params,
    pub default_constraints: SignatureConstraints,
    /// Argument contracts for the allowlisted tools, when the exporter
    /// holds them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_contracts: Vec<ToolContract>,
}

impl SignatureContractExportV1 {
    pub fn from_signature(signature: &Signature) -> Result<Self> {
        Ok(Self {
            format: SIGNATURE_CONTRACT_FORMAT.to_string(),
            format_version: WIRE_VERSION_1,
            signature_id: signature.id.clone(),
            input_schema: signature.input_schema.clone(),
            output_schema: signature.output_schema.clone(),
            prompt_ir: signature.prompt_ir.clone(),
            prompt_ir_hash: signature.prompt_ir.ir_hash()?.as_str().to_string(),
            default_params: signature.defaults.params.clone(),
            default_constraints: signature.defaults.constraints.clone(),
            tool_contracts: Vec::new(),
        })
    }

    pub fn with_tool_contracts(mut self, contracts: Vec<ToolContract>) -> Self {
        self.tool_contracts = contracts;
        self
    }
}

/// Compile job submitted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileJobSpecV1 {
    pub format: String,
    pub format_version: u32,
    pub signature_id: String,
    /// Dataset the caller's evaluator scores candidates against.
    pub dataset_id: String,
    /// Metric the caller's evaluator reports.
    pub metric_id: String,
    pub search_space: SearchSpace,
    pub optimizer: OptimizerProvenance,
    #[serde(default)]
    pub provenance: Provenance,
    pub sample_input: serde_json::Value,
}

impl CompileJobSpecV1 {
    /// Convert into the compiler's job shape. `dataset_id` and `metric_id`
    /// parameterize the evaluator the caller supplies alongside the job.
    pub fn into_job(self) -> CompileJob {
        CompileJob {
            search_space: self.search_space,
            optimizer: self.optimizer,
            provenance: self.provenance,
            sample_input: self.sample_input,
        }
    }
}

/// A compiled artifact as persisted and exchanged. The envelope adds only
/// the format version; the body is the artifact's storage shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DseCompiledArtifactV1 {
    pub format_version: u32,
    #[serde(flatten)]
    pub artifact: CompiledArtifact,
}

impl From<CompiledArtifact> for DseCompiledArtifactV1 {
    fn from(artifact: CompiledArtifact) -> Self {
        Self {
            format_version: WIRE_VERSION_1,
            artifact,
        }
    }
}

/// Evaluation evidence on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummaryV1 {
    pub format_version: u32,
    #[serde(flatten)]
    pub eval: EvalSummary,
}

impl From<EvalSummary> for EvalSummaryV1 {
    fn from(eval: EvalSummary) -> Self {
        Self {
            format_version: WIRE_VERSION_1,
            eval,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::StrategyParams;
    use crate::domain::prompt_ir::PromptBlock;
    use crate::domain::signature::SignatureDefaults;
    use serde_json::json;

    fn make_signature() -> Signature {
        let mut params = Params::new();
        params.strategy = Some(StrategyParams {
            id: "direct.v1".to_string(),
        });
        Signature::new(
            "qa/Answer.v1",
            json!({"type": "object"}),
            json!({"type": "object", "required": ["answer"]}),
            PromptIr::new(vec![PromptBlock::System {
                text: "Answer.".to_string(),
            }]),
            SignatureDefaults {
                params,
                constraints: SignatureConstraints {
                    allowed_tools: vec!["search".to_string()],
                    ..Default::default()
                },
            },
        )
        .unwrap()
    }

    #[test]
    fn test_signature_export_carries_full_contract() {
        let export = SignatureContractExportV1::from_signature(&make_signature())
            .unwrap()
            .with_tool_contracts(vec![ToolContract {
                name: "search".to_string(),
                args_schema: json!({"type": "object", "required": ["query"]}),
            }]);

        assert_eq!(export.format, SIGNATURE_CONTRACT_FORMAT);
        assert_eq!(export.format_version, 1);
        assert_eq!(export.prompt_ir.blocks.len(), 1);
        assert_eq!(export.default_params.strategy_id(), "direct.v1");
        assert_eq!(export.default_constraints.allowed_tools, vec!["search"]);
        assert_eq!(export.tool_contracts.len(), 1);

        let json = serde_json::to_string(&export).unwrap();
        let back: SignatureContractExportV1 = serde_json::from_str(&json).unwrap();
        assert_eq!(export, back);
    }

    #[test]
    fn test_compile_job_spec_roundtrip_and_into_job() {
        let spec = CompileJobSpecV1 {
            format: COMPILE_JOB_FORMAT.to_string(),
            format_version: WIRE_VERSION_1,
            signature_id: "qa/Answer.v1".to_string(),
            dataset_id: "qa-dev".to_string(),
            metric_id: "exact_match".to_string(),
            search_space: SearchSpace {
                candidates: vec![Params::new()],
            },
            optimizer: OptimizerProvenance {
                id: "grid.v1".to_string(),
                config: Some(json!({"axes": 2})),
                iterations: Some(4),
            },
            provenance: Provenance::default(),
            sample_input: json!({"q": "x"}),
        };
        let json = serde_json::to_string(&spec).unwrap();
        let back: CompileJobSpecV1 = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dataset_id, "qa-dev");
        assert_eq!(back.metric_id, "exact_match");
        let job = back.into_job();
        assert_eq!(job.search_space.candidates.len(), 1);
        assert_eq!(job.optimizer.id, "grid.v1");
    }

    #[test]
    fn test_readers_ignore_unknown_fields() {
        // Additive evolution: a newer writer may add fields this version
        // does not know about.
        let raw = json!({
            "format": "dse.signature_contract",
            "format_version": 2,
            "signature_id": "qa/Answer.v1",
            "input_schema": {},
            "output_schema": {},
            "prompt_ir": {"version": 1, "blocks": []},
            "prompt_ir_hash": "sha256:abc",
            "default_params": {},
            "default_constraints": {},
            "added_in_v2": true
        });
        let export: SignatureContractExportV1 = serde_json::from_value(raw).unwrap();
        assert_eq!(export.format_version, 2);
        assert!(export.tool_contracts.is_empty());
    }

    #[test]
    fn test_eval_summary_envelope_flattens() {
        let wire: EvalSummaryV1 = EvalSummary::new("ds", "exact_match", 10, 0.5).into();
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["format_version"], 1);
        assert_eq!(json["dataset_id"], "ds");
        let back: EvalSummaryV1 = serde_json::from_value(json).unwrap();
        assert_eq!(wire, back);
    }
}
