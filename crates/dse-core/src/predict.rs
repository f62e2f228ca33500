//! Predict engine: one invocation from artifact resolution to decoded output.
//!
//! An invocation moves through fixed phases — resolve artifact, apply
//! params, render, execute, decode — and finalizes with exactly one receipt
//! whether it succeeds or fails. The whole run races a wall-clock deadline;
//! losing the race finalizes as `BudgetExceeded` with the receipt intact.
//!
//! Strategy preconditions are checked before any model call: an unknown
//! strategy id or unpinned kernel budgets fail closed with zero calls made.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use dse_state::{
    ActivePointerStore, ArtifactStore, BlobRef, BlobStore, ContentHash, ReceiptSink,
};
use uuid::Uuid;

use crate::decode::decode_output;
use crate::domain::artifact::CompiledArtifact;
use crate::domain::budget::{BudgetHandle, BudgetUsage};
use crate::domain::digest::compute_hash;
use crate::domain::error::{DseError, PredictStrategyError, Result};
use crate::domain::params::{
    ModelConfig, Params, STRATEGY_DIRECT_V1, STRATEGY_RLM_LITE_V1,
};
use crate::domain::receipt::{Receipt, ReceiptError, Timings};
use crate::domain::signature::Signature;
use crate::lm::{LmClient, LmRole};
use crate::obs;
use crate::render::{render, rendered_prompt_hash, RenderContext};
use crate::rlm::{KernelContext, RlmKernel, RunTrace, VarValue};
use crate::schema;
use crate::tooling::{ToolContract, ToolExecutor};

/// Collaborators a predict invocation runs against.
pub struct PredictContext<'a> {
    pub lm: &'a dyn LmClient,
    pub tools: &'a dyn ToolExecutor,
    pub blob_store: &'a dyn BlobStore,
    pub artifacts: &'a dyn ArtifactStore,
    pub pointers: &'a dyn ActivePointerStore,
    pub receipts: &'a dyn ReceiptSink,
    /// Contracts for tools the kernel may validate arguments against.
    pub tool_contracts: &'a [ToolContract],
}

/// One predict request.
#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub input: serde_json::Value,
    /// Pin a specific artifact instead of following the active pointer.
    pub pinned_compiled_id: Option<ContentHash>,
    /// Caller deadline; the stricter of this and the params deadline wins.
    pub deadline_ms: Option<u64>,
}

impl PredictRequest {
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            input,
            pinned_compiled_id: None,
            deadline_ms: None,
        }
    }
}

/// Successful invocation result.
#[derive(Debug)]
pub struct PredictOutcome {
    pub output: serde_json::Value,
    pub receipt: Receipt,
}

/// Facts collected as the run progresses, so failure receipts carry
/// everything known at the point of failure.
#[derive(Default)]
struct Scratch {
    compiled_id: Mutex<Option<ContentHash>>,
    strategy_id: Mutex<Option<String>>,
    prompt_hash: Mutex<Option<ContentHash>>,
    output_hash: Mutex<Option<ContentHash>>,
    trace_ref: Mutex<Option<BlobRef>>,
    /// Live handle into the kernel's trace. Outlives the strategy future,
    /// so a run dropped by the deadline race can still be audited.
    trace: Mutex<Option<Arc<Mutex<RunTrace>>>>,
    budget: Mutex<Option<Arc<BudgetHandle>>>,
}

impl Scratch {
    fn set<T>(slot: &Mutex<Option<T>>, value: T) {
        *slot.lock().unwrap() = Some(value);
    }

    fn take<T: Clone>(slot: &Mutex<Option<T>>) -> Option<T> {
        slot.lock().unwrap().clone()
    }
}

/// Run one predict invocation. Exactly one receipt is recorded through
/// `ctx.receipts` before this returns, on every path.
pub async fn predict(
    signature: &Signature,
    request: &PredictRequest,
    ctx: &PredictContext<'_>,
) -> Result<PredictOutcome> {
    let run_id = Uuid::new_v4().to_string();
    let _span = obs::RunSpan::enter(&run_id);
    let started_at = Utc::now();
    let clock = Instant::now();
    let scratch = Scratch::default();

    let result = run(signature, request, ctx, &run_id, &scratch).await;

    let duration_ms = clock.elapsed().as_millis() as u64;
    let mut budget_usage = Scratch::take(&scratch.budget)
        .map(|b| b.usage())
        .unwrap_or_else(BudgetUsage::default);
    budget_usage.time_ms = duration_ms;

    let receipt = Receipt {
        signature_id: signature.id.clone(),
        compiled_id: Scratch::take(&scratch.compiled_id),
        run_id: run_id.clone(),
        strategy_id: Scratch::take(&scratch.strategy_id)
            .unwrap_or_else(|| "unresolved".to_string()),
        prompt_hash: Scratch::take(&scratch.prompt_hash),
        output_hash: Scratch::take(&scratch.output_hash),
        budget_usage,
        timings: Timings {
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        },
        rlm_trace_ref: Scratch::take(&scratch.trace_ref),
        error: result.as_ref().err().map(|e| ReceiptError {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }),
    };
    ctx.receipts
        .record(receipt.to_row()?)
        .await
        .map_err(DseError::Storage)?;
    obs::emit_predict_finished(&run_id, duration_ms, result.is_ok());

    result.map(|output| PredictOutcome { output, receipt })
}

async fn run(
    signature: &Signature,
    request: &PredictRequest,
    ctx: &PredictContext<'_>,
    run_id: &str,
    scratch: &Scratch,
) -> Result<serde_json::Value> {
    // Phase: resolve artifact.
    let artifact = resolve_artifact(signature, request, ctx).await?;
    if let Some(artifact) = &artifact {
        Scratch::set(&scratch.compiled_id, artifact.compiled_id.clone());
    }
    obs::emit_predict_started(
        run_id,
        &signature.id,
        artifact.as_ref().map(|a| a.compiled_id.as_str()),
    );

    // Phase: apply params. Artifact params overlay the signature defaults;
    // with no artifact the defaults run bare.
    let params = match &artifact {
        Some(artifact) => artifact.params.merge_over(&signature.defaults.params),
        None => signature.defaults.params.clone(),
    };
    let strategy_id = params.strategy_id().to_string();
    Scratch::set(&scratch.strategy_id, strategy_id.clone());
    obs::emit_strategy_dispatched(run_id, &strategy_id);
    check_strategy(&strategy_id, &params)?;

    schema::check(&request.input, &signature.input_schema).map_err(DseError::Contract)?;

    let limits = params.budgets.clone().unwrap_or_default();
    let budget = Arc::new(BudgetHandle::new(limits.clone()));
    Scratch::set(&scratch.budget, Arc::clone(&budget));

    // Stricter of the pinned and the caller deadline wins.
    let deadline_ms = match (limits.max_time_ms, request.deadline_ms) {
        (Some(pinned), Some(caller)) => Some(pinned.min(caller)),
        (pinned, caller) => pinned.or(caller),
    };

    let work = execute(
        signature,
        &request.input,
        &params,
        &strategy_id,
        ctx,
        run_id,
        scratch,
        &budget,
    );
    let result = match deadline_ms {
        None => work.await,
        Some(ms) => {
            tokio::select! {
                result = work => result,
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                    obs::emit_budget_exceeded(run_id, "max_time_ms", ms, ms);
                    Err(DseError::BudgetExceeded {
                        limit_name: "max_time_ms".to_string(),
                        limit: ms,
                        attempted: ms,
                    })
                }
            }
        }
    };

    // Whatever the kernel recorded is stored and referenced from the
    // receipt, whether the run finished, failed, or lost the deadline race.
    if let Some(trace) = Scratch::take(&scratch.trace) {
        let snapshot = trace.lock().unwrap().clone();
        match snapshot.store(ctx.blob_store).await {
            Ok(trace_ref) => Scratch::set(&scratch.trace_ref, trace_ref),
            Err(store_err) => {
                if result.is_ok() {
                    return Err(store_err);
                }
                tracing::warn!(
                    event = "trace_store_failed",
                    run_id = %run_id,
                    error = %store_err,
                    "kernel trace not persisted"
                );
            }
        }
    }
    result
}

async fn resolve_artifact(
    signature: &Signature,
    request: &PredictRequest,
    ctx: &PredictContext<'_>,
) -> Result<Option<CompiledArtifact>> {
    let compiled_id = match &request.pinned_compiled_id {
        Some(id) => Some(id.clone()),
        None => ctx
            .pointers
            .get_active(&signature.id)
            .await
            .map_err(DseError::Storage)?,
    };
    match compiled_id {
        None => Ok(None),
        Some(id) => {
            let row = ctx
                .artifacts
                .get(&signature.id, &id)
                .await
                .map_err(DseError::Storage)?;
            let artifact: CompiledArtifact = serde_json::from_value(row)?;
            artifact.verify_id()?;
            Ok(Some(artifact))
        }
    }
}

/// Strategy preconditions, checked before any model call.
fn check_strategy(strategy_id: &str, params: &Params) -> Result<()> {
    match strategy_id {
        STRATEGY_DIRECT_V1 => Ok(()),
        STRATEGY_RLM_LITE_V1 => {
            let budgets = params.budgets.clone().unwrap_or_default();
            let mut missing = Vec::new();
            if budgets.max_rlm_iterations.is_none() {
                missing.push("max_rlm_iterations".to_string());
            }
            if budgets.max_sub_lm_calls.is_none() {
                missing.push("max_sub_lm_calls".to_string());
            }
            if missing.is_empty() {
                Ok(())
            } else {
                Err(DseError::Strategy(PredictStrategyError::BudgetsNotPinned {
                    strategy_id: strategy_id.to_string(),
                    missing,
                }))
            }
        }
        other => Err(DseError::Strategy(PredictStrategyError::UnknownStrategy {
            strategy_id: other.to_string(),
        })),
    }
}

fn role_config<'p>(
    params: &'p Params,
    pick: impl Fn(&'p crate::domain::params::ModelRoles) -> Option<&'p ModelConfig>,
) -> Option<&'p ModelConfig> {
    params
        .model_roles
        .as_ref()
        .and_then(pick)
        .or(params.model.as_ref())
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    signature: &Signature,
    input: &serde_json::Value,
    params: &Params,
    strategy_id: &str,
    ctx: &PredictContext<'_>,
    run_id: &str,
    scratch: &Scratch,
    budget: &BudgetHandle,
) -> Result<serde_json::Value> {
    // Phase: render.
    let variants = signature.instruction_variants();
    let messages = render(
        &signature.prompt_ir,
        params,
        &RenderContext {
            input,
            variants: &variants,
            blob_store: ctx.blob_store,
        },
    )
    .await?;
    Scratch::set(&scratch.prompt_hash, rendered_prompt_hash(&messages)?);

    let main_cfg = role_config(params, |r| r.main.as_ref());
    let sub_cfg = role_config(params, |r| r.sub.as_ref());
    let repair_cfg = role_config(params, |r| r.repair.as_ref());

    // Phase: execute.
    let raw = match strategy_id {
        STRATEGY_DIRECT_V1 => {
            budget.on_lm_call()?;
            ctx.lm.complete(LmRole::Main, main_cfg, &messages).await?.text
        }
        STRATEGY_RLM_LITE_V1 => {
            let mut kernel = RlmKernel::new(
                KernelContext {
                    run_id,
                    signature_id: &signature.id,
                    allowed_tools: signature.allowed_tools(),
                    tool_contracts: ctx.tool_contracts,
                    tuning: params.rlm_lite.clone().unwrap_or_default(),
                    main_model: main_cfg,
                    sub_model: sub_cfg,
                    lm: ctx.lm,
                    tools: ctx.tools,
                    blob_store: ctx.blob_store,
                    budget,
                },
                messages,
            );
            kernel.seed_var("input", VarValue::Json(input.clone()));
            Scratch::set(&scratch.trace, kernel.trace_handle());
            kernel.run().await?.to_string()
        }
        other => {
            return Err(DseError::Strategy(PredictStrategyError::UnknownStrategy {
                strategy_id: other.to_string(),
            }))
        }
    };

    // Phase: decode.
    let decode_params = params.decode.clone().unwrap_or_default();
    let outcome = decode_output(
        &raw,
        &signature.output_schema,
        &decode_params,
        ctx.lm,
        repair_cfg,
        budget,
    )
    .await?;
    Scratch::set(&scratch.output_hash, compute_hash(&outcome.value)?);
    Ok(outcome.value)
}
