//! Domain-level error taxonomy for DSE.
//!
//! Every fatal predict error still produces a receipt; `error_kind()` is the
//! stable string recorded there.

/// Errors produced by prompt IR normalization and rendering.
#[derive(Debug, thiserror::Error)]
pub enum PromptIrError {
    #[error("few-shot example not in pool: {example_id}")]
    MissingExample { example_id: String },

    #[error("malformed prompt block: {detail}")]
    MalformedBlock { detail: String },

    #[error("unsupported prompt IR version: {version}")]
    UnsupportedVersion { version: u32 },

    #[error("mutation not allowed for this signature: {detail}")]
    DisallowedMutation { detail: String },
}

/// Errors raised by the predict engine before any model call is made.
#[derive(Debug, thiserror::Error)]
pub enum PredictStrategyError {
    #[error("unknown strategy: {strategy_id}")]
    UnknownStrategy { strategy_id: String },

    #[error("strategy {strategy_id} requires pinned budgets: {missing:?}")]
    BudgetsNotPinned {
        strategy_id: String,
        missing: Vec<String>,
    },
}

/// Errors from the decode/repair pipeline.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("output is not parseable JSON: {detail}")]
    ParseFailed { detail: String, raw: String },

    #[error("output failed schema validation after {repairs_used} repairs: {detail}")]
    SchemaValidationFailed {
        detail: String,
        repairs_used: u32,
        /// Last raw model output, kept for diagnosis.
        last_raw: String,
    },
}

/// DSE domain errors.
#[derive(Debug, thiserror::Error)]
pub enum DseError {
    /// Input does not satisfy the signature's declared contract.
    #[error("contract violation: {0}")]
    Contract(String),

    #[error("prompt IR error: {0}")]
    PromptIr(#[from] PromptIrError),

    #[error("strategy error: {0}")]
    Strategy(#[from] PredictStrategyError),

    /// A pinned budget limit would be exceeded. Terminal, fail-closed.
    #[error("budget exceeded: {limit_name} limit {limit}, attempted {attempted}")]
    BudgetExceeded {
        limit_name: String,
        limit: u64,
        attempted: u64,
    },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Tool call outside the signature allowlist. Fatal, never retried.
    #[error("tool policy violation: {tool} not in allowlist of {signature_id}")]
    ToolPolicyViolation { tool: String, signature_id: String },

    /// Controller emitted something that is not a valid action.
    #[error("malformed controller action: {detail}")]
    MalformedAction { detail: String },

    /// Re-put of an existing compiled id with different content.
    #[error("artifact conflict: {signature_id}/{compiled_id} already stored with different content")]
    ArtifactConflict {
        signature_id: String,
        compiled_id: String,
    },

    #[error("model call failed: {0}")]
    LmCall(String),

    #[error("tool execution failed: {tool}: {detail}")]
    ToolExecution { tool: String, detail: String },

    #[error("storage error: {0}")]
    Storage(#[from] dse_state::StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DseError {
    /// Stable error kind string recorded in receipts.
    pub fn kind(&self) -> &'static str {
        match self {
            DseError::Contract(_) => "contract",
            DseError::PromptIr(_) => "prompt_ir",
            DseError::Strategy(_) => "strategy",
            DseError::BudgetExceeded { .. } => "budget_exceeded",
            DseError::Decode(_) => "decode",
            DseError::ToolPolicyViolation { .. } => "tool_policy_violation",
            DseError::MalformedAction { .. } => "malformed_action",
            DseError::ArtifactConflict { .. } => "artifact_conflict",
            DseError::LmCall(_) => "lm_call",
            DseError::ToolExecution { .. } => "tool_execution",
            DseError::Storage(_) => "storage",
            DseError::Serialization(_) => "serialization",
            DseError::Io(_) => "io",
        }
    }
}

/// Result type for DSE domain operations.
pub type Result<T> = std::result::Result<T, DseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_example_display() {
        let err = PromptIrError::MissingExample {
            example_id: "ex2".to_string(),
        };
        assert!(err.to_string().contains("ex2"));
    }

    #[test]
    fn test_budgets_not_pinned_display() {
        let err = PredictStrategyError::BudgetsNotPinned {
            strategy_id: "rlm_lite.v1".to_string(),
            missing: vec!["max_rlm_iterations".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("rlm_lite.v1"));
        assert!(msg.contains("max_rlm_iterations"));
    }

    #[test]
    fn test_budget_exceeded_kind() {
        let err = DseError::BudgetExceeded {
            limit_name: "max_sub_lm_calls".to_string(),
            limit: 10,
            attempted: 11,
        };
        assert_eq!(err.kind(), "budget_exceeded");
        assert!(err.to_string().contains("max_sub_lm_calls"));
    }

    #[test]
    fn test_tool_policy_violation_kind() {
        let err = DseError::ToolPolicyViolation {
            tool: "shell".to_string(),
            signature_id: "qa/Answer.v1".to_string(),
        };
        assert_eq!(err.kind(), "tool_policy_violation");
    }
}
