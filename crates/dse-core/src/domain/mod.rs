//! DSE domain model: the data shapes pinned by hashes and artifacts.

pub mod artifact;
pub mod budget;
pub mod digest;
pub mod error;
pub mod eval;
pub mod params;
pub mod prompt_ir;
pub mod receipt;
pub mod signature;

pub use artifact::{ArtifactHashes, CompiledArtifact, OptimizerProvenance, Provenance};
pub use budget::{BudgetHandle, BudgetLimits, BudgetUsage};
pub use digest::{canonical_json, compute_hash};
pub use error::{DecodeError, DseError, PredictStrategyError, PromptIrError, Result};
pub use eval::{EvalSummary, TokenUsage, EVAL_VERSION};
pub use params::{
    DecodeMode, DecodeParams, FewShotParams, InstructionParams, ModelConfig, ModelRoles, Params,
    RlmLiteParams, StrategyParams, ToolParams, PARAMS_VERSION, STRATEGY_DIRECT_V1,
    STRATEGY_RLM_LITE_V1,
};
pub use prompt_ir::{
    apply_mutation, ContextEntry, ContextSource, FewShotExample, PreviewPolicy, PromptBlock,
    PromptIr, PromptMutation, TrustLevel, PROMPT_IR_VERSION,
};
pub use receipt::{Receipt, ReceiptError, Timings};
pub use signature::{
    validate_signature_id, InstructionVariant, Signature, SignatureConstraints, SignatureDefaults,
};
