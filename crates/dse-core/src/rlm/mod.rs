//! RLM-lite symbolic execution kernel.
//!
//! The controller model never sees raw large content; it sees var names and
//! bounded previews, and steers the run by emitting one [`Action`] per
//! iteration. The kernel executes actions against the [`VarSpace`], charges
//! every budgeted step *before* executing it, and appends each step to the
//! run trace. Chunk fanout runs kernel-side with bounded concurrency; the
//! controller only ever issues one `extract_over_chunks` action.

pub mod action;
pub mod trace;
pub mod var_space;

pub use action::{parse_action, Action, SearchScope};
pub use trace::{RunTrace, TraceEntry};
pub use var_space::{VarSpace, VarValue};

use std::sync::{Arc, Mutex};

use dse_state::BlobStore;
use futures::stream::{self, StreamExt};
use serde_json::json;

use crate::decode::decode_tool_args;
use crate::domain::budget::BudgetHandle;
use crate::domain::digest::canonical_json;
use crate::domain::error::{DseError, Result};
use crate::domain::params::{ModelConfig, RlmLiteParams};
use crate::lm::{LmClient, LmRole, ProviderMessage};
use crate::obs;
use crate::tooling::{ToolContract, ToolExecutor};

/// Default preview width when the controller does not ask for one.
const DEFAULT_PREVIEW_CHARS: usize = 240;
/// Cap on reported matches per `search` action.
const MAX_SEARCH_MATCHES: usize = 20;

/// Everything a kernel run needs from its surroundings.
pub struct KernelContext<'a> {
    pub run_id: &'a str,
    pub signature_id: &'a str,
    pub allowed_tools: &'a [String],
    pub tool_contracts: &'a [ToolContract],
    pub tuning: RlmLiteParams,
    pub main_model: Option<&'a ModelConfig>,
    pub sub_model: Option<&'a ModelConfig>,
    pub lm: &'a dyn LmClient,
    pub tools: &'a dyn ToolExecutor,
    pub blob_store: &'a dyn BlobStore,
    pub budget: &'a BudgetHandle,
}

/// One kernel run: controller loop, var space, and trace.
pub struct RlmKernel<'a> {
    ctx: KernelContext<'a>,
    vars: VarSpace,
    messages: Vec<ProviderMessage>,
    trace: Arc<Mutex<RunTrace>>,
}

impl<'a> RlmKernel<'a> {
    pub fn new(ctx: KernelContext<'a>, base_messages: Vec<ProviderMessage>) -> Self {
        let trace = Arc::new(Mutex::new(RunTrace::new(ctx.run_id, ctx.signature_id)));
        Self {
            ctx,
            vars: VarSpace::new(),
            messages: base_messages,
            trace,
        }
    }

    /// Bind a var before the loop starts (typically the run input).
    pub fn seed_var(&mut self, name: impl Into<String>, value: VarValue) {
        self.vars.write(name, value);
    }

    /// Snapshot of the trace recorded so far.
    pub fn trace(&self) -> RunTrace {
        self.trace.lock().unwrap().clone()
    }

    /// Shared handle to the live trace. The holder can persist whatever was
    /// recorded even if the run future is dropped mid-iteration.
    pub fn trace_handle(&self) -> Arc<Mutex<RunTrace>> {
        Arc::clone(&self.trace)
    }

    /// Drive the controller loop until `final` or a terminal error.
    ///
    /// Returns the raw `final` payload; decoding it against the output
    /// schema is the caller's job.
    pub async fn run(&mut self) -> Result<serde_json::Value> {
        loop {
            self.ctx.budget.on_rlm_iteration()?;
            self.ctx.budget.on_lm_call()?;
            let response = self
                .ctx
                .lm
                .complete(LmRole::Main, self.ctx.main_model, &self.messages)
                .await?;
            let action = parse_action(&response.text)?;
            let seq = self.trace.lock().unwrap().entries.len() as u64 + 1;
            obs::emit_rlm_action(self.ctx.run_id, seq, action.tag());

            if let Action::Final { output } = &action {
                let output = output.clone();
                self.ctx
                    .budget
                    .on_output_chars(output.to_string().chars().count() as u64)?;
                self.trace.lock().unwrap().push(action, json!({"ok": true}));
                return Ok(output);
            }

            let result = self.execute(&action).await?;
            let rendered = serde_json::to_string(&result)?;
            self.ctx
                .budget
                .on_output_chars(rendered.chars().count() as u64)?;
            self.messages.push(ProviderMessage::assistant(response.text));
            self.messages.push(ProviderMessage::user(rendered));
            self.trace.lock().unwrap().push(action, result);
        }
    }

    /// Execute one non-final action. Var-level misses produce recoverable
    /// error results; budget, policy, and malformed-action failures are
    /// terminal and propagate.
    async fn execute(&mut self, action: &Action) -> Result<serde_json::Value> {
        match action {
            Action::Preview { var, max_chars } => self.preview(var, *max_chars).await,
            Action::Search { query, scope } => self.search(query, *scope).await,
            Action::Load { var } => match self.load_text(var).await? {
                Some(text) => Ok(json!({"text": text})),
                None => Ok(unknown_var(var)),
            },
            Action::Chunk {
                var,
                target,
                chunk_chars,
                overlap_chars,
            } => match self.load_text(var).await? {
                Some(text) => {
                    let chunks = chunk_text(
                        &text,
                        chunk_chars.unwrap_or(self.ctx.tuning.chunk_chars),
                        overlap_chars.unwrap_or(self.ctx.tuning.overlap_chars),
                    );
                    let count = chunks.len();
                    self.vars.write(target.clone(), VarValue::Json(json!(chunks)));
                    Ok(json!({"chunks": count}))
                }
                None => Ok(unknown_var(var)),
            },
            Action::WriteVar { var, value } => {
                self.vars.write(var.clone(), VarValue::Json(value.clone()));
                Ok(json!({"ok": true}))
            }
            Action::SubLm { prompt, target } => {
                self.ctx.budget.on_sub_lm_call()?;
                let response = self
                    .ctx
                    .lm
                    .complete(
                        LmRole::Sub,
                        self.ctx.sub_model,
                        &[ProviderMessage::user(prompt.clone())],
                    )
                    .await?;
                if let Some(target) = target {
                    self.vars
                        .write(target.clone(), VarValue::Json(json!(response.text)));
                }
                Ok(json!({"text": response.text}))
            }
            Action::ExtractOverChunks {
                var,
                instruction,
                target,
            } => self.extract_over_chunks(var, instruction, target).await,
            Action::ToolCall { tool, args, target } => {
                self.tool_call(tool, args, target.as_deref()).await
            }
            Action::Final { .. } => unreachable!("final is handled by the loop"),
        }
    }

    async fn preview(&self, var: &str, max_chars: Option<usize>) -> Result<serde_json::Value> {
        let max_chars = max_chars.unwrap_or(DEFAULT_PREVIEW_CHARS);
        match self.vars.read(var) {
            None => Ok(unknown_var(var)),
            // Metadata only: previewing a blob never loads it.
            Some(VarValue::Blob(blob)) => Ok(json!({
                "blob": {"hash": blob.hash.as_str(), "size_bytes": blob.size_bytes}
            })),
            Some(VarValue::Json(value)) => {
                let text = canonical_json(value)?;
                let total_chars = text.chars().count();
                let preview: String = text.chars().take(max_chars).collect();
                Ok(json!({"preview": preview, "total_chars": total_chars}))
            }
        }
    }

    async fn search(&self, query: &str, scope: SearchScope) -> Result<serde_json::Value> {
        let mut matches = Vec::new();
        for (name, value) in self.vars.iter() {
            if matches.len() >= MAX_SEARCH_MATCHES {
                break;
            }
            let text = match (scope, value) {
                (SearchScope::Vars, VarValue::Json(v)) => canonical_json(v)?,
                (SearchScope::Blob, VarValue::Blob(blob)) => {
                    let bytes = self
                        .ctx
                        .blob_store
                        .get(&blob.hash)
                        .await
                        .map_err(DseError::Storage)?;
                    String::from_utf8_lossy(&bytes).into_owned()
                }
                _ => continue,
            };
            for (offset, _) in text
                .match_indices(query)
                .take(MAX_SEARCH_MATCHES - matches.len())
            {
                matches.push(json!({"var": name, "offset": offset}));
            }
        }
        Ok(json!({"matches": matches}))
    }

    /// Full text of a var: strings verbatim, other JSON canonicalized,
    /// blobs fetched. `None` for an unbound name.
    async fn load_text(&self, var: &str) -> Result<Option<String>> {
        match self.vars.read(var) {
            None => Ok(None),
            Some(VarValue::Json(serde_json::Value::String(s))) => Ok(Some(s.clone())),
            Some(VarValue::Json(value)) => Ok(Some(canonical_json(value)?)),
            Some(VarValue::Blob(blob)) => {
                let bytes = self
                    .ctx
                    .blob_store
                    .get(&blob.hash)
                    .await
                    .map_err(DseError::Storage)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
    }

    async fn extract_over_chunks(
        &mut self,
        var: &str,
        instruction: &str,
        target: &str,
    ) -> Result<serde_json::Value> {
        // A var already holding a string array is used as-is; anything else
        // is loaded as text and chunked here.
        let chunks: Vec<String> = match self.vars.read(var) {
            Some(VarValue::Json(serde_json::Value::Array(items)))
                if items.iter().all(|i| i.is_string()) =>
            {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            }
            _ => match self.load_text(var).await? {
                Some(text) => chunk_text(
                    &text,
                    self.ctx.tuning.chunk_chars,
                    self.ctx.tuning.overlap_chars,
                ),
                None => return Ok(unknown_var(var)),
            },
        };

        // Reserve the whole fanout up front; a fanout that cannot fit the
        // remaining sub-call budget fails closed before any call is made.
        self.ctx.budget.on_sub_lm_calls(chunks.len() as u64)?;

        let lm = self.ctx.lm;
        let sub_model = self.ctx.sub_model;
        let parallelism = self.ctx.tuning.max_parallelism.max(1);
        let mut indexed: Vec<(usize, String)> =
            stream::iter(chunks.into_iter().enumerate().map(|(index, chunk)| {
                let instruction = instruction.to_string();
                async move {
                    let messages = [
                        ProviderMessage::system(instruction),
                        ProviderMessage::user(chunk),
                    ];
                    let response = lm.complete(LmRole::Sub, sub_model, &messages).await?;
                    Ok::<_, DseError>((index, response.text))
                }
            }))
            .buffer_unordered(parallelism)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_>>()?;

        indexed.sort_by_key(|(index, _)| *index);
        let extracted: Vec<String> = indexed.into_iter().map(|(_, text)| text).collect();
        let count = extracted.len();
        self.vars
            .write(target.to_string(), VarValue::Json(json!(extracted)));
        Ok(json!({"extracted": count}))
    }

    async fn tool_call(
        &mut self,
        tool: &str,
        args: &serde_json::Value,
        target: Option<&str>,
    ) -> Result<serde_json::Value> {
        if !self.ctx.allowed_tools.iter().any(|t| t == tool) {
            obs::emit_tool_policy_violation(self.ctx.run_id, self.ctx.signature_id, tool);
            return Err(DseError::ToolPolicyViolation {
                tool: tool.to_string(),
                signature_id: self.ctx.signature_id.to_string(),
            });
        }
        if let Some(contract) = self.ctx.tool_contracts.iter().find(|c| c.name == tool) {
            decode_tool_args(tool, args, &contract.args_schema)?;
        }
        self.ctx.budget.on_tool_call()?;
        let result = self.ctx.tools.execute(tool, args).await?;
        if let Some(target) = target {
            self.vars
                .write(target.to_string(), VarValue::Json(result.clone()));
        }
        Ok(json!({"result": result}))
    }
}

fn unknown_var(var: &str) -> serde_json::Value {
    json!({"error": format!("unknown var: {var}")})
}

/// Deterministic fixed-size chunking with overlap, on char boundaries.
/// Stops at the first chunk that reaches the end of the text; no
/// overlap-only tail chunk is emitted.
pub fn chunk_text(text: &str, chunk_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chunk_chars == 0 {
        return Vec::new();
    }
    let step = chunk_chars.saturating_sub(overlap_chars).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
