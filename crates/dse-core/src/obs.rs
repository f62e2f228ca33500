//! Structured observability hooks for DSE run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: predict start/finish,
//!   strategy dispatch, kernel actions, budget and policy failures,
//!   pointer moves
//!
//! Events are emitted at `info!` level (configurable via `DSE_LOG` env
//! var). For JSON output, set `DSE_LOG_FORMAT=json`.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a
/// predict invocation.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // All tracing calls are now associated with run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        let span = tracing::info_span!("dse.run", run_id = %run_id);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: predict invocation started.
pub fn emit_predict_started(run_id: &str, signature_id: &str, compiled_id: Option<&str>) {
    info!(
        event = "predict.started",
        run_id = %run_id,
        signature_id = %signature_id,
        compiled_id = compiled_id.unwrap_or("none"),
    );
}

/// Emit event: strategy selected for the run.
pub fn emit_strategy_dispatched(run_id: &str, strategy_id: &str) {
    info!(event = "predict.strategy", run_id = %run_id, strategy_id = %strategy_id);
}

/// Emit event: predict finished with duration and success status.
pub fn emit_predict_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "predict.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: one kernel action executed.
pub fn emit_rlm_action(run_id: &str, seq: u64, action_tag: &str) {
    info!(event = "rlm.action", run_id = %run_id, seq = seq, action = %action_tag);
}

/// Emit event: a pinned budget limit was hit (warning level).
pub fn emit_budget_exceeded(run_id: &str, limit_name: &str, limit: u64, attempted: u64) {
    warn!(
        event = "budget.exceeded",
        run_id = %run_id,
        limit_name = %limit_name,
        limit = limit,
        attempted = attempted,
    );
}

/// Emit event: tool call outside the allowlist (warning level,
/// security-relevant).
pub fn emit_tool_policy_violation(run_id: &str, signature_id: &str, tool: &str) {
    warn!(
        event = "tool.policy_violation",
        run_id = %run_id,
        signature_id = %signature_id,
        tool = %tool,
    );
}

/// Emit event: active pointer moved (promotion or rollback).
pub fn emit_pointer_moved(signature_id: &str, compiled_id: &str, reason: &str) {
    info!(
        event = "registry.pointer_moved",
        signature_id = %signature_id,
        compiled_id = %compiled_id,
        reason = %reason,
    );
}
