//! Per-run budget limits, usage counters, and the fail-closed charge handle.
//!
//! Every budgeted action charges the handle *before* executing; if the
//! charge would cross a pinned limit the handle returns
//! [`DseError::BudgetExceeded`] and the usage counter is left untouched.
//! Usage is monotonically non-decreasing within a run.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::domain::error::{DseError, Result};

/// Hard per-run limits. `None` means the limit is not pinned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    /// Wall-clock deadline for the whole run, in milliseconds.
    pub max_time_ms: Option<u64>,
    /// Main/repair/judge-role model calls.
    pub max_lm_calls: Option<u64>,
    /// Tool executions.
    pub max_tool_calls: Option<u64>,
    /// Controller loop iterations.
    pub max_rlm_iterations: Option<u64>,
    /// Sub-role model calls (including kernel-driven fanout).
    pub max_sub_lm_calls: Option<u64>,
    /// Total characters across action results and final output.
    pub max_output_chars: Option<u64>,
}

/// Usage counters mirroring [`BudgetLimits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub time_ms: u64,
    pub lm_calls: u64,
    pub tool_calls: u64,
    pub rlm_iterations: u64,
    pub sub_lm_calls: u64,
    pub output_chars: u64,
}

/// Shared charge handle for one run.
///
/// Cheap to share by reference across the kernel and fanout tasks; interior
/// mutability keeps counter updates atomic with their limit checks.
#[derive(Debug)]
pub struct BudgetHandle {
    limits: BudgetLimits,
    usage: Mutex<BudgetUsage>,
}

impl BudgetHandle {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            usage: Mutex::new(BudgetUsage::default()),
        }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    /// Snapshot of current usage.
    pub fn usage(&self) -> BudgetUsage {
        *self.usage.lock().unwrap()
    }

    /// Record elapsed wall-clock time. Not a charge: time overruns are
    /// enforced by the run-level deadline race, this only keeps the receipt
    /// accurate.
    pub fn record_time_ms(&self, elapsed_ms: u64) {
        let mut usage = self.usage.lock().unwrap();
        usage.time_ms = usage.time_ms.max(elapsed_ms);
    }

    /// Charge one controller iteration.
    pub fn on_rlm_iteration(&self) -> Result<()> {
        self.charge("max_rlm_iterations", self.limits.max_rlm_iterations, 1, |u| {
            &mut u.rlm_iterations
        })
    }

    /// Charge one main/repair/judge-role model call.
    pub fn on_lm_call(&self) -> Result<()> {
        self.charge("max_lm_calls", self.limits.max_lm_calls, 1, |u| {
            &mut u.lm_calls
        })
    }

    /// Charge one sub-role model call.
    pub fn on_sub_lm_call(&self) -> Result<()> {
        self.charge("max_sub_lm_calls", self.limits.max_sub_lm_calls, 1, |u| {
            &mut u.sub_lm_calls
        })
    }

    /// Charge `n` sub-role model calls at once (fanout pre-reservation).
    pub fn on_sub_lm_calls(&self, n: u64) -> Result<()> {
        self.charge("max_sub_lm_calls", self.limits.max_sub_lm_calls, n, |u| {
            &mut u.sub_lm_calls
        })
    }

    /// Charge one tool execution.
    pub fn on_tool_call(&self) -> Result<()> {
        self.charge("max_tool_calls", self.limits.max_tool_calls, 1, |u| {
            &mut u.tool_calls
        })
    }

    /// Charge `n` output characters.
    pub fn on_output_chars(&self, n: u64) -> Result<()> {
        self.charge("max_output_chars", self.limits.max_output_chars, n, |u| {
            &mut u.output_chars
        })
    }

    fn charge(
        &self,
        limit_name: &str,
        limit: Option<u64>,
        amount: u64,
        counter: impl Fn(&mut BudgetUsage) -> &mut u64,
    ) -> Result<()> {
        let mut usage = self.usage.lock().unwrap();
        let current = *counter(&mut usage);
        let attempted = current.saturating_add(amount);
        if let Some(limit) = limit {
            if attempted > limit {
                return Err(DseError::BudgetExceeded {
                    limit_name: limit_name.to_string(),
                    limit,
                    attempted,
                });
            }
        }
        *counter(&mut usage) = attempted;
        Ok(())
    }
}
