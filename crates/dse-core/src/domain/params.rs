//! Optimizable parameter model pinned by compiled artifacts.
//!
//! [`Params`] is the serializable set of knobs the compiler is allowed to
//! search over. Unknown fields round-trip through `extra` so newer runtimes
//! can hash params older runtimes produced (forward-compatibility
//! invariant).

use dse_state::ContentHash;
use serde::{Deserialize, Serialize};

use crate::domain::budget::BudgetLimits;
use crate::domain::digest::compute_hash;
use crate::domain::error::Result;

/// Current params format version.
pub const PARAMS_VERSION: u32 = 1;

/// Strategy id for the single-call strategy.
pub const STRATEGY_DIRECT_V1: &str = "direct.v1";
/// Strategy id for the symbolic-execution kernel strategy.
pub const STRATEGY_RLM_LITE_V1: &str = "rlm_lite.v1";

/// Strategy selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyParams {
    pub id: String,
}

/// Instruction override. When both `variant_id` and `text` are set,
/// literal `text` wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Few-shot subset selection by example id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotParams {
    pub example_ids: Vec<String>,
}

/// Model settings for one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Per-role model overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRoles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repair: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<ModelConfig>,
}

/// Decode pipeline mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Fence strip + strict JSON parse only.
    StrictJson,
    /// Fence strip + strict parse, falling back to tolerant parsing.
    #[default]
    Jsonish,
}

/// Decode policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    pub mode: DecodeMode,
    /// Repair-role retries after a schema decode failure.
    pub max_repairs: u32,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Jsonish,
            max_repairs: 1,
        }
    }
}

/// Tool policy override. Can only restrict what the signature declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
}

/// RLM kernel tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RlmLiteParams {
    /// Chunk size for `chunk`/`extract_over_chunks`, in characters.
    pub chunk_chars: usize,
    /// Overlap between consecutive chunks, in characters.
    pub overlap_chars: usize,
    /// Internal fanout parallelism cap.
    pub max_parallelism: usize,
}

impl Default for RlmLiteParams {
    fn default() -> Self {
        Self {
            chunk_chars: 4000,
            overlap_chars: 200,
            max_parallelism: 4,
        }
    }
}

/// The full optimizable parameter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Params {
    pub params_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<InstructionParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub few_shot: Option<FewShotParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_roles: Option<ModelRoles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode: Option<DecodeParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rlm_lite: Option<RlmLiteParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budgets: Option<BudgetLimits>,
    /// Unknown fields, preserved for hashing but ignored by this runtime.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Params {
    pub fn new() -> Self {
        Self {
            params_version: PARAMS_VERSION,
            ..Default::default()
        }
    }

    /// Content hash of the canonicalized params.
    pub fn params_hash(&self) -> Result<ContentHash> {
        compute_hash(&serde_json::to_value(self)?)
    }

    /// Strategy id, defaulting to `direct.v1` when unset.
    pub fn strategy_id(&self) -> &str {
        self.strategy
            .as_ref()
            .map(|s| s.id.as_str())
            .unwrap_or(STRATEGY_DIRECT_V1)
    }

    /// Overlay `self` on `base`: any section pinned here wins, sections left
    /// unset fall through to the base (signature defaults).
    pub fn merge_over(&self, base: &Params) -> Params {
        let mut extra = base.extra.clone();
        for (k, v) in &self.extra {
            extra.insert(k.clone(), v.clone());
        }
        Params {
            params_version: self.params_version.max(base.params_version),
            strategy: self.strategy.clone().or_else(|| base.strategy.clone()),
            instruction: self
                .instruction
                .clone()
                .or_else(|| base.instruction.clone()),
            few_shot: self.few_shot.clone().or_else(|| base.few_shot.clone()),
            model: self.model.clone().or_else(|| base.model.clone()),
            model_roles: self
                .model_roles
                .clone()
                .or_else(|| base.model_roles.clone()),
            decode: self.decode.clone().or_else(|| base.decode.clone()),
            tools: self.tools.clone().or_else(|| base.tools.clone()),
            rlm_lite: self.rlm_lite.clone().or_else(|| base.rlm_lite.clone()),
            budgets: self.budgets.clone().or_else(|| base.budgets.clone()),
            extra,
        }
    }
}

impl InstructionParams {
    /// Literal `text` wins over `variant_id` when both are set.
    pub fn effective_text<'a>(
        &'a self,
        variants: &'a [(String, String)],
    ) -> Option<&'a str> {
        if let Some(text) = &self.text {
            return Some(text);
        }
        self.variant_id.as_ref().and_then(|id| {
            variants
                .iter()
                .find(|(vid, _)| vid == id)
                .map(|(_, text)| text.as_str())
        })
    }
}
