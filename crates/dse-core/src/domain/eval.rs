//! Evaluation evidence attached to compiled artifacts.
//!
//! The evaluation harness itself is an external collaborator; DSE only
//! consumes its summary output and pins it inside artifacts.

use serde::{Deserialize, Serialize};

/// Current eval summary format version.
pub const EVAL_VERSION: u32 = 1;

/// Aggregate token usage over an evaluation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Summary of one evaluation run over a dataset with a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalSummary {
    pub eval_version: u32,
    pub dataset_id: String,
    pub metric_id: String,
    /// Number of evaluated cases.
    pub n: u64,
    pub mean_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p50_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p95_score: Option<f64>,
    /// Cases that errored rather than scored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failures: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
}

impl EvalSummary {
    pub fn new(dataset_id: impl Into<String>, metric_id: impl Into<String>, n: u64, mean_score: f64) -> Self {
        Self {
            eval_version: EVAL_VERSION,
            dataset_id: dataset_id.into(),
            metric_id: metric_id.into(),
            n,
            mean_score,
            p50_score: None,
            p95_score: None,
            failures: None,
            latency_ms: None,
            tokens: None,
        }
    }
}
