//! DSE Core Library
//!
//! Declarative signature engine: compile LM-program params into immutable,
//! content-addressed artifacts and execute them under pinned budgets with
//! auditable receipts. Re-exports the domain model, the compile and predict
//! entry points, and the RLM-lite kernel.

pub mod compiler;
pub mod decode;
pub mod domain;
pub mod lm;
pub mod obs;
pub mod predict;
pub mod registry;
pub mod render;
pub mod rlm;
pub mod schema;
pub mod telemetry;
pub mod tooling;
pub mod wire;

/// Crate version, stamped into artifact provenance by callers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use domain::{
    apply_mutation, canonical_json, compute_hash, ArtifactHashes, BudgetHandle, BudgetLimits,
    BudgetUsage, CompiledArtifact, ContextEntry, ContextSource, DecodeError, DecodeMode,
    DecodeParams, DseError, EvalSummary, FewShotExample, FewShotParams, InstructionParams,
    InstructionVariant, ModelConfig, ModelRoles, OptimizerProvenance, Params,
    PredictStrategyError, PreviewPolicy, PromptBlock, PromptIr, PromptIrError, PromptMutation,
    Provenance, Receipt, ReceiptError, Result, RlmLiteParams, Signature, SignatureConstraints,
    SignatureDefaults, StrategyParams, Timings, TokenUsage, ToolParams, TrustLevel,
    PARAMS_VERSION, PROMPT_IR_VERSION, STRATEGY_DIRECT_V1, STRATEGY_RLM_LITE_V1,
};

pub use compiler::{
    compile, CandidateEvaluator, CompileJob, CompileOutcome, RejectedCandidate, SearchSpace,
};
pub use decode::{decode_output, decode_tool_args, DecodeOutcome};
pub use lm::{LmClient, LmResponse, LmRole, MessageRole, ProviderMessage, ScriptedLm};
pub use obs::RunSpan;
pub use predict::{predict, PredictContext, PredictOutcome, PredictRequest};
pub use registry::ArtifactRegistry;
pub use render::{render, rendered_prompt_hash, RenderContext};
pub use rlm::{
    chunk_text, parse_action, Action, KernelContext, RlmKernel, RunTrace, SearchScope, TraceEntry,
    VarSpace, VarValue,
};
pub use schema::{validate, SchemaViolation};
pub use telemetry::init_tracing;
pub use tooling::{EchoToolExecutor, ToolContract, ToolExecutor};
pub use wire::{
    CompileJobSpecV1, DseCompiledArtifactV1, EvalSummaryV1, SignatureContractExportV1,
    COMPILE_JOB_FORMAT, SIGNATURE_CONTRACT_FORMAT, WIRE_VERSION_1,
};

pub use dse_state::{BlobRef, BlobStore, ContentHash};
