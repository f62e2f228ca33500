//! Immutable audit record of one predict invocation.
//!
//! Exactly one receipt is written per invocation regardless of outcome, so
//! failures stay auditable: a fail-closed strategy error produces a receipt
//! with no prompt hash and zero model calls in its usage counters.

use chrono::{DateTime, Utc};
use dse_state::{BlobRef, ContentHash, ReceiptRow};
use serde::{Deserialize, Serialize};

use crate::domain::budget::BudgetUsage;
use crate::domain::error::Result;

/// Wall-clock timing of the invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Error evidence carried by failure receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptError {
    /// Stable kind string from `DseError::kind()`.
    pub kind: String,
    pub message: String,
}

/// The receipt itself. Immutable after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub signature_id: String,
    /// `None` when the run fell back to signature defaults.
    pub compiled_id: Option<ContentHash>,
    pub run_id: String,
    pub strategy_id: String,
    /// Hash of the rendered prompt. Absent when the run failed before
    /// rendering (e.g. unpinned budgets).
    pub prompt_hash: Option<ContentHash>,
    pub output_hash: Option<ContentHash>,
    pub budget_usage: BudgetUsage,
    pub timings: Timings,
    /// Blob reference to the serialized RLM trace, for kernel runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rlm_trace_ref: Option<BlobRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReceiptError>,
}

impl Receipt {
    /// Convert into the storage row shape.
    pub fn to_row(&self) -> Result<ReceiptRow> {
        Ok(ReceiptRow {
            run_id: self.run_id.clone(),
            signature_id: self.signature_id.clone(),
            body: serde_json::to_value(self)?,
            recorded_at: Utc::now(),
        })
    }
}
