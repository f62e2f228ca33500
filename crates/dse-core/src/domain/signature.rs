//! Typed input/output contract for one LM-facing step.
//!
//! A [`Signature`] bundles the schemas, the default prompt IR, and default
//! params/constraints under a stable, versioned id (`ns/Name.vN`). A
//! signature is immutable once published under an id; behavior changes
//! require a new version suffix. Artifacts reference signatures by id only,
//! never by value.

use dse_state::ContentHash;
use serde::{Deserialize, Serialize};

use crate::domain::digest::compute_hash;
use crate::domain::error::{DseError, Result};
use crate::domain::params::Params;
use crate::domain::prompt_ir::PromptIr;

/// A named instruction variant the compiler may select by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionVariant {
    pub id: String,
    pub text: String,
}

/// Fixed constraints that are never part of the optimizable search space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConstraints {
    /// Tools this signature may call. Empty means not tool-aware.
    pub allowed_tools: Vec<String>,
    /// Whether this is a judge signature (gates rubric mutations).
    pub judge: bool,
    /// Instruction variants selectable via `instruction.variant_id`.
    pub instruction_variants: Vec<InstructionVariant>,
}

/// Default params and constraints used when no artifact is active.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureDefaults {
    pub params: Params,
    pub constraints: SignatureConstraints,
}

/// The unit of compilation: contract + prompt IR + defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Stable versioned id, e.g. `"qa/Answer.v1"`.
    pub id: String,
    pub input_schema: serde_json::Value,
    pub output_schema: serde_json::Value,
    pub prompt_ir: PromptIr,
    pub defaults: SignatureDefaults,
}

impl Signature {
    /// Create a signature, validating the id shape.
    pub fn new(
        id: impl Into<String>,
        input_schema: serde_json::Value,
        output_schema: serde_json::Value,
        prompt_ir: PromptIr,
        defaults: SignatureDefaults,
    ) -> Result<Self> {
        let id = id.into();
        validate_signature_id(&id)?;
        Ok(Self {
            id,
            input_schema,
            output_schema,
            prompt_ir,
            defaults,
        })
    }

    pub fn input_schema_hash(&self) -> Result<ContentHash> {
        compute_hash(&self.input_schema)
    }

    pub fn output_schema_hash(&self) -> Result<ContentHash> {
        compute_hash(&self.output_schema)
    }

    /// Whether the signature declares tool usage, either via constraints or
    /// a tool-policy block in the IR.
    pub fn is_tool_aware(&self) -> bool {
        !self.defaults.constraints.allowed_tools.is_empty()
            || self.prompt_ir.declared_tools().is_some()
    }

    /// Tools a run under this signature may call.
    pub fn allowed_tools(&self) -> &[String] {
        if !self.defaults.constraints.allowed_tools.is_empty() {
            &self.defaults.constraints.allowed_tools
        } else {
            self.prompt_ir.declared_tools().unwrap_or(&[])
        }
    }

    /// Instruction variants as `(id, text)` pairs for params resolution.
    pub fn instruction_variants(&self) -> Vec<(String, String)> {
        self.defaults
            .constraints
            .instruction_variants
            .iter()
            .map(|v| (v.id.clone(), v.text.clone()))
            .collect()
    }
}

/// Validate the `ns/Name.vN` id shape.
pub fn validate_signature_id(id: &str) -> Result<()> {
    let malformed = || {
        DseError::Contract(format!(
            "signature id must be ns/Name.vN, got: {id}"
        ))
    };

    let (ns, rest) = id.split_once('/').ok_or_else(malformed)?;
    let (name, version) = rest.rsplit_once(".v").ok_or_else(malformed)?;
    if ns.is_empty() || name.is_empty() {
        return Err(malformed());
    }
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return Err(malformed());
    }
    Ok(())
}
