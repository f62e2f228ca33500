//! Versioned, block-structured prompt intermediate representation.
//!
//! A [`PromptIr`] is the structured form of a model-facing prompt: an
//! ordered list of tagged blocks. Block order is semantically significant
//! and preserved verbatim through normalization.
//!
//! [`normalize`](PromptIr::normalize) strips runtime-only fields and
//! replaces few-shot example bodies with stable id/content-hash references,
//! so [`ir_hash`](PromptIr::ir_hash) is stable across formatting changes
//! and repeated renders. Structural changes outside the
//! [`PromptMutation`] allowlist require bumping the IR version.

use chrono::{DateTime, Utc};
use dse_state::{BlobRef, ContentHash};
use serde::{Deserialize, Serialize};

use crate::domain::digest::compute_hash;
use crate::domain::error::{DseError, PromptIrError, Result};

/// Current prompt IR format version.
pub const PROMPT_IR_VERSION: u32 = 1;

/// How much of a context entry may enter model token space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum PreviewPolicy {
    /// Inline at most `max_bytes` of the content, marking truncation.
    InlinePreview { max_bytes: usize },
    /// Never inline content; render name/size/hash metadata only.
    MetadataOnly,
}

/// Trust classification for context entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Trusted,
    Untrusted,
}

/// Where a context entry's content lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextSource {
    /// Small inline JSON value.
    Inline { value: serde_json::Value },
    /// Large content held in the blob store.
    Blob { blob: BlobRef },
}

/// One named context entry with trust and preview metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub name: String,
    pub source: ContextSource,
    pub trust: TrustLevel,
    pub preview: PreviewPolicy,
}

/// A few-shot example. Bodies are present in the authoring form; after
/// normalization only `id` and `content_hash` remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
}

impl FewShotExample {
    /// Create an example with bodies (authoring form).
    pub fn new(id: impl Into<String>, input: serde_json::Value, output: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            input: Some(input),
            output: Some(output),
            content_hash: None,
        }
    }

    /// Content hash over `{input, output}`; stable across formatting.
    pub fn body_hash(&self) -> Result<ContentHash> {
        match (&self.input, &self.output) {
            (Some(input), Some(output)) => compute_hash(&serde_json::json!({
                "input": input,
                "output": output,
            })),
            _ => self.content_hash.clone().ok_or_else(|| {
                DseError::PromptIr(PromptIrError::MalformedBlock {
                    detail: format!("example {} has neither bodies nor content_hash", self.id),
                })
            }),
        }
    }
}

/// Closed set of prompt block variants. Render and mutation sites match
/// exhaustively, so adding a variant is a compile-time-checked change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptBlock {
    System {
        text: String,
    },
    Instruction {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        variant_id: Option<String>,
    },
    FewShot {
        examples: Vec<FewShotExample>,
    },
    ToolPolicy {
        allowed_tools: Vec<String>,
    },
    OutputFormat {
        schema: serde_json::Value,
    },
    Context {
        entries: Vec<ContextEntry>,
    },
    /// Scoring rubric; only valid on judge signatures.
    Rubric {
        criteria: Vec<String>,
    },
}

/// The prompt intermediate representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptIr {
    pub version: u32,
    pub blocks: Vec<PromptBlock>,
    /// Volatile: when this IR instance was materialized. Stripped by
    /// normalization so it never reaches the hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendered_at: Option<DateTime<Utc>>,
    /// Volatile: originating request id. Stripped by normalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl PromptIr {
    pub fn new(blocks: Vec<PromptBlock>) -> Self {
        Self {
            version: PROMPT_IR_VERSION,
            blocks,
            rendered_at: None,
            request_id: None,
        }
    }

    /// Produce the canonical hashing form: volatile fields stripped,
    /// few-shot example bodies replaced with id/content-hash references.
    /// Block order is preserved verbatim.
    pub fn normalize(&self) -> Result<PromptIr> {
        if self.version != PROMPT_IR_VERSION {
            return Err(DseError::PromptIr(PromptIrError::UnsupportedVersion {
                version: self.version,
            }));
        }

        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let normalized = match block {
                PromptBlock::FewShot { examples } => {
                    let refs = examples
                        .iter()
                        .map(|ex| {
                            Ok(FewShotExample {
                                id: ex.id.clone(),
                                input: None,
                                output: None,
                                content_hash: Some(ex.body_hash()?),
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    PromptBlock::FewShot { examples: refs }
                }
                other => other.clone(),
            };
            blocks.push(normalized);
        }

        Ok(PromptIr {
            version: self.version,
            blocks,
            rendered_at: None,
            request_id: None,
        })
    }

    /// `hash(canonicalize(normalize(ir)))` — the identity pinned by
    /// compiled artifacts.
    pub fn ir_hash(&self) -> Result<ContentHash> {
        let normalized = self.normalize()?;
        compute_hash(&serde_json::to_value(&normalized)?)
    }

    /// The few-shot example pool, if any.
    pub fn few_shot_pool(&self) -> Option<&[FewShotExample]> {
        self.blocks.iter().find_map(|b| match b {
            PromptBlock::FewShot { examples } => Some(examples.as_slice()),
            _ => None,
        })
    }

    /// Tools declared by a `ToolPolicy` block, if present.
    pub fn declared_tools(&self) -> Option<&[String]> {
        self.blocks.iter().find_map(|b| match b {
            PromptBlock::ToolPolicy { allowed_tools } => Some(allowed_tools.as_slice()),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Compiler mutation allowlist
// ---------------------------------------------------------------------------

/// The explicit allowlist of structural changes the compiler may apply to
/// an IR. Anything else requires a new IR version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mutation", rename_all = "snake_case")]
pub enum PromptMutation {
    ReplaceInstruction { text: String },
    SelectFewShot { example_ids: Vec<String> },
    TightenOutputFormat { schema: serde_json::Value },
    RestrictToolPolicy { allowed_tools: Vec<String> },
    AddRubric { criteria: Vec<String> },
}

/// Apply one allowlisted mutation.
///
/// * `tool_aware` — whether the signature declares tool usage; gates
///   `RestrictToolPolicy`.
/// * `judge` — whether this is a judge signature; gates `AddRubric`.
pub fn apply_mutation(
    ir: &PromptIr,
    mutation: &PromptMutation,
    tool_aware: bool,
    judge: bool,
) -> Result<PromptIr> {
    let mut out = ir.clone();
    match mutation {
        PromptMutation::ReplaceInstruction { text } => {
            let mut replaced = false;
            for block in &mut out.blocks {
                if let PromptBlock::Instruction { text: t, variant_id } = block {
                    *t = text.clone();
                    *variant_id = None;
                    replaced = true;
                }
            }
            if !replaced {
                return Err(DseError::PromptIr(PromptIrError::MalformedBlock {
                    detail: "no instruction block to replace".to_string(),
                }));
            }
        }
        PromptMutation::SelectFewShot { example_ids } => {
            for block in &mut out.blocks {
                if let PromptBlock::FewShot { examples } = block {
                    for id in example_ids {
                        if !examples.iter().any(|ex| &ex.id == id) {
                            return Err(DseError::PromptIr(PromptIrError::MissingExample {
                                example_id: id.clone(),
                            }));
                        }
                    }
                    examples.retain(|ex| example_ids.contains(&ex.id));
                }
            }
        }
        PromptMutation::TightenOutputFormat { schema } => {
            for block in &mut out.blocks {
                if let PromptBlock::OutputFormat { schema: s } = block {
                    *s = schema.clone();
                }
            }
        }
        PromptMutation::RestrictToolPolicy { allowed_tools } => {
            if !tool_aware {
                return Err(DseError::PromptIr(PromptIrError::DisallowedMutation {
                    detail: "signature does not declare tool awareness".to_string(),
                }));
            }
            for block in &mut out.blocks {
                if let PromptBlock::ToolPolicy { allowed_tools: t } = block {
                    // Restriction only: the new set must be a subset.
                    for tool in allowed_tools {
                        if !t.contains(tool) {
                            return Err(DseError::PromptIr(PromptIrError::DisallowedMutation {
                                detail: format!("tool {tool} not in existing policy"),
                            }));
                        }
                    }
                    *t = allowed_tools.clone();
                }
            }
        }
        PromptMutation::AddRubric { criteria } => {
            if !judge {
                return Err(DseError::PromptIr(PromptIrError::DisallowedMutation {
                    detail: "rubric blocks are judge-signature only".to_string(),
                }));
            }
            out.blocks.push(PromptBlock::Rubric {
                criteria: criteria.clone(),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_ir() -> PromptIr {
        PromptIr::new(vec![
            PromptBlock::System {
                text: "You answer questions.".to_string(),
            },
            PromptBlock::Instruction {
                text: "Answer concisely.".to_string(),
                variant_id: None,
            },
            PromptBlock::FewShot {
                examples: vec![
                    FewShotExample::new("ex1", json!({"q": "a?"}), json!({"a": "b"})),
                    FewShotExample::new("ex2", json!({"q": "c?"}), json!({"a": "d"})),
                ],
            },
            PromptBlock::OutputFormat {
                schema: json!({"type": "object", "required": ["a"]}),
            },
        ])
    }

    #[test]
    fn test_normalize_strips_volatile_fields() {
        let mut ir = sample_ir();
        ir.rendered_at = Some(Utc::now());
        ir.request_id = Some("req-123".to_string());
        let normalized = ir.normalize().unwrap();
        assert!(normalized.rendered_at.is_none());
        assert!(normalized.request_id.is_none());
    }

    #[test]
    fn test_normalize_replaces_example_bodies_with_refs() {
        let normalized = sample_ir().normalize().unwrap();
        let pool = normalized.few_shot_pool().unwrap();
        assert_eq!(pool.len(), 2);
        for ex in pool {
            assert!(ex.input.is_none());
            assert!(ex.output.is_none());
            assert!(ex.content_hash.is_some());
        }
    }

    #[test]
    fn test_ir_hash_ignores_volatile_fields() {
        let base = sample_ir();
        let mut with_timestamp = base.clone();
        with_timestamp.rendered_at = Some(Utc::now());
        with_timestamp.request_id = Some("req-9".to_string());
        assert_eq!(
            base.ir_hash().unwrap(),
            with_timestamp.ir_hash().unwrap()
        );
    }

    #[test]
    fn test_ir_hash_changes_with_block_order() {
        let ir = sample_ir();
        let mut reordered = ir.clone();
        reordered.blocks.swap(0, 1);
        assert_ne!(ir.ir_hash().unwrap(), reordered.ir_hash().unwrap());
    }

    #[test]
    fn test_ir_hash_changes_with_example_body() {
        let ir = sample_ir();
        let mut edited = ir.clone();
        if let PromptBlock::FewShot { examples } = &mut edited.blocks[2] {
            examples[0].output = Some(json!({"a": "different"}));
        }
        assert_ne!(ir.ir_hash().unwrap(), edited.ir_hash().unwrap());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut ir = sample_ir();
        ir.version = 2;
        match ir.normalize() {
            Err(DseError::PromptIr(PromptIrError::UnsupportedVersion { version: 2 })) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_block_serde_tagging() {
        let block = PromptBlock::System {
            text: "sys".to_string(),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "system");
        let back: PromptBlock = serde_json::from_value(json).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn test_replace_instruction_mutation() {
        let ir = sample_ir();
        let out = apply_mutation(
            &ir,
            &PromptMutation::ReplaceInstruction {
                text: "Be verbose.".to_string(),
            },
            false,
            false,
        )
        .unwrap();
        match &out.blocks[1] {
            PromptBlock::Instruction { text, .. } => assert_eq!(text, "Be verbose."),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_select_few_shot_missing_id_fails() {
        let ir = sample_ir();
        let err = apply_mutation(
            &ir,
            &PromptMutation::SelectFewShot {
                example_ids: vec!["ex1".to_string(), "ex9".to_string()],
            },
            false,
            false,
        )
        .unwrap_err();
        match err {
            DseError::PromptIr(PromptIrError::MissingExample { example_id }) => {
                assert_eq!(example_id, "ex9");
            }
            other => panic!("expected MissingExample, got {other:?}"),
        }
    }

    #[test]
    fn test_rubric_requires_judge_signature() {
        let ir = sample_ir();
        let mutation = PromptMutation::AddRubric {
            criteria: vec!["correctness".to_string()],
        };
        assert!(apply_mutation(&ir, &mutation, false, false).is_err());
        let out = apply_mutation(&ir, &mutation, false, true).unwrap();
        assert!(matches!(out.blocks.last(), Some(PromptBlock::Rubric { .. })));
    }

    #[test]
    fn test_restrict_tool_policy_subset_only() {
        let ir = PromptIr::new(vec![PromptBlock::ToolPolicy {
            allowed_tools: vec!["search".to_string(), "fetch".to_string()],
        }]);
        // Restricting to a subset is allowed.
        let out = apply_mutation(
            &ir,
            &PromptMutation::RestrictToolPolicy {
                allowed_tools: vec!["search".to_string()],
            },
            true,
            false,
        )
        .unwrap();
        assert_eq!(out.declared_tools().unwrap(), ["search".to_string()]);
        // Widening is not.
        assert!(apply_mutation(
            &ir,
            &PromptMutation::RestrictToolPolicy {
                allowed_tools: vec!["shell".to_string()],
            },
            true,
            false,
        )
        .is_err());
    }
}
