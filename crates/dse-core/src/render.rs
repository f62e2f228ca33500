//! Prompt IR rendering: structured blocks to provider messages.
//!
//! Rendering is a pure function of `(ir, params, input)` modulo blob store
//! reads: the same inputs always produce the same message list, which is
//! what makes `rendered_prompt_hash` a usable cache key. BlobRef context
//! entries are dereferenced through the [`BlobStore`] collaborator under
//! their preview policy — this is the mechanism that keeps unbounded
//! context out of token space.

use dse_state::{BlobStore, ContentHash};

use crate::domain::digest::{canonical_json, compute_hash};
use crate::domain::error::{DseError, PromptIrError, Result};
use crate::domain::params::Params;
use crate::domain::prompt_ir::{
    ContextEntry, ContextSource, FewShotExample, PreviewPolicy, PromptBlock, PromptIr, TrustLevel,
};
use crate::lm::ProviderMessage;

/// Everything rendering needs besides the IR and params.
pub struct RenderContext<'a> {
    /// Caller input; becomes the final user message.
    pub input: &'a serde_json::Value,
    /// Instruction variants declared by the signature, as `(id, text)`.
    pub variants: &'a [(String, String)],
    /// Blob store for dereferencing context entries.
    pub blob_store: &'a dyn BlobStore,
}

/// Render the IR with params applied into provider messages.
pub async fn render(
    ir: &PromptIr,
    params: &Params,
    ctx: &RenderContext<'_>,
) -> Result<Vec<ProviderMessage>> {
    if ir.version != crate::domain::prompt_ir::PROMPT_IR_VERSION {
        return Err(DseError::PromptIr(PromptIrError::UnsupportedVersion {
            version: ir.version,
        }));
    }

    let mut messages = Vec::new();
    for block in &ir.blocks {
        match block {
            PromptBlock::System { text } => {
                messages.push(ProviderMessage::system(text.clone()));
            }
            PromptBlock::Instruction { text, .. } => {
                let effective = params
                    .instruction
                    .as_ref()
                    .and_then(|i| i.effective_text(ctx.variants))
                    .unwrap_or(text);
                messages.push(ProviderMessage::system(effective.to_string()));
            }
            PromptBlock::FewShot { examples } => {
                render_few_shot(examples, params, &mut messages)?;
            }
            PromptBlock::ToolPolicy { allowed_tools } => {
                let effective = effective_tools(allowed_tools, params);
                messages.push(ProviderMessage::system(format!(
                    "Available tools: {}",
                    effective.join(", ")
                )));
            }
            PromptBlock::OutputFormat { schema } => {
                messages.push(ProviderMessage::system(format!(
                    "Respond with a single JSON value matching this schema: {}",
                    canonical_json(schema)?
                )));
            }
            PromptBlock::Context { entries } => {
                for entry in entries {
                    messages.push(render_context_entry(entry, ctx.blob_store).await?);
                }
            }
            PromptBlock::Rubric { criteria } => {
                messages.push(ProviderMessage::system(format!(
                    "Score against these criteria:\n- {}",
                    criteria.join("\n- ")
                )));
            }
        }
    }

    messages.push(ProviderMessage::user(canonical_json(ctx.input)?));
    Ok(messages)
}

fn render_few_shot(
    examples: &[FewShotExample],
    params: &Params,
    messages: &mut Vec<ProviderMessage>,
) -> Result<()> {
    let selected: Vec<&FewShotExample> = match params.few_shot.as_ref() {
        Some(few_shot) => {
            let mut picked = Vec::with_capacity(few_shot.example_ids.len());
            for id in &few_shot.example_ids {
                let found = examples.iter().find(|ex| &ex.id == id).ok_or_else(|| {
                    DseError::PromptIr(PromptIrError::MissingExample {
                        example_id: id.clone(),
                    })
                })?;
                picked.push(found);
            }
            picked
        }
        None => examples.iter().collect(),
    };

    for example in selected {
        let (input, output) = match (&example.input, &example.output) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                return Err(DseError::PromptIr(PromptIrError::MalformedBlock {
                    detail: format!(
                        "example {} has no bodies; cannot render a normalized pool",
                        example.id
                    ),
                }))
            }
        };
        messages.push(ProviderMessage::user(canonical_json(input)?));
        messages.push(ProviderMessage::assistant(canonical_json(output)?));
    }
    Ok(())
}

fn effective_tools(declared: &[String], params: &Params) -> Vec<String> {
    match params.tools.as_ref().and_then(|t| t.allowed_tools.as_ref()) {
        // Params may only restrict, so intersect with the declared set.
        Some(restricted) => declared
            .iter()
            .filter(|t| restricted.contains(t))
            .cloned()
            .collect(),
        None => declared.to_vec(),
    }
}

async fn render_context_entry(
    entry: &ContextEntry,
    blob_store: &dyn BlobStore,
) -> Result<ProviderMessage> {
    let trust_tag = match entry.trust {
        TrustLevel::Trusted => "trusted",
        TrustLevel::Untrusted => "untrusted",
    };

    let body = match &entry.source {
        ContextSource::Inline { value } => match &entry.preview {
            PreviewPolicy::MetadataOnly => format!("[inline value, {} withheld]", entry.name),
            PreviewPolicy::InlinePreview { max_bytes } => {
                truncate_preview(&canonical_json(value)?, *max_bytes)
            }
        },
        ContextSource::Blob { blob } => match &entry.preview {
            PreviewPolicy::MetadataOnly => format!(
                "[blob {} {} bytes {}]",
                entry.name,
                blob.size_bytes,
                blob.hash.short()
            ),
            PreviewPolicy::InlinePreview { max_bytes } => {
                let bytes = blob_store.get(&blob.hash).await.map_err(DseError::Storage)?;
                let text = String::from_utf8_lossy(&bytes);
                truncate_preview(&text, *max_bytes)
            }
        },
    };

    Ok(ProviderMessage::system(format!(
        "[context {} ({trust_tag})]\n{body}",
        entry.name
    )))
}

/// Truncate on a char boundary, appending an explicit truncation marker so
/// the model never mistakes a preview for complete content.
fn truncate_preview(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n[truncated: showing {} of {} bytes]",
        &text[..end],
        end,
        text.len()
    )
}

/// Content hash of a rendered message list, used as `rendered_prompt_hash`.
pub fn rendered_prompt_hash(messages: &[ProviderMessage]) -> Result<ContentHash> {
    compute_hash(&serde_json::to_value(messages)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::params::{FewShotParams, ToolParams};
    use crate::domain::prompt_ir::FewShotExample;
    use dse_state::fakes::MemoryBlobStore;
    use serde_json::json;

    fn sample_ir() -> PromptIr {
        PromptIr::new(vec![
            PromptBlock::System {
                text: "You answer questions.".to_string(),
            },
            PromptBlock::FewShot {
                examples: vec![
                    FewShotExample::new("ex1", json!({"q": "2+2?"}), json!({"a": "4"})),
                    FewShotExample::new("ex2", json!({"q": "3+3?"}), json!({"a": "6"})),
                ],
            },
        ])
    }

    #[tokio::test]
    async fn test_render_is_deterministic() {
        let store = MemoryBlobStore::new();
        let ir = sample_ir();
        let params = Params::new();
        let input = json!({"q": "what?"});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        let m1 = render(&ir, &params, &ctx).await.unwrap();
        let m2 = render(&ir, &params, &ctx).await.unwrap();
        assert_eq!(
            rendered_prompt_hash(&m1).unwrap(),
            rendered_prompt_hash(&m2).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_example_fails_not_skips() {
        let store = MemoryBlobStore::new();
        let ir = PromptIr::new(vec![PromptBlock::FewShot {
            examples: vec![FewShotExample::new("ex1", json!({}), json!({}))],
        }]);
        let mut params = Params::new();
        params.few_shot = Some(FewShotParams {
            example_ids: vec!["ex1".to_string(), "ex2".to_string()],
        });
        let input = json!({});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        match render(&ir, &params, &ctx).await {
            Err(DseError::PromptIr(PromptIrError::MissingExample { example_id })) => {
                assert_eq!(example_id, "ex2");
            }
            other => panic!("expected MissingExample(ex2), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_few_shot_selection_renders_pairs_in_order() {
        let store = MemoryBlobStore::new();
        let ir = sample_ir();
        let mut params = Params::new();
        params.few_shot = Some(FewShotParams {
            example_ids: vec!["ex2".to_string()],
        });
        let input = json!({"q": "x"});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        let messages = render(&ir, &params, &ctx).await.unwrap();
        // system + one user/assistant pair + final user input
        assert_eq!(messages.len(), 4);
        assert!(messages[1].content.contains("3+3?"));
        assert!(messages[2].content.contains("6"));
    }

    #[tokio::test]
    async fn test_blob_context_inline_preview_truncates() {
        let store = MemoryBlobStore::new();
        let blob = store.put("x".repeat(500).as_bytes()).await.unwrap();
        let ir = PromptIr::new(vec![PromptBlock::Context {
            entries: vec![ContextEntry {
                name: "doc".to_string(),
                source: ContextSource::Blob { blob },
                trust: TrustLevel::Untrusted,
                preview: PreviewPolicy::InlinePreview { max_bytes: 100 },
            }],
        }]);
        let input = json!({});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        let messages = render(&ir, &Params::new(), &ctx).await.unwrap();
        assert!(messages[0].content.contains("truncated: showing 100 of 500 bytes"));
        assert!(messages[0].content.contains("untrusted"));
    }

    #[tokio::test]
    async fn test_blob_context_metadata_only_never_fetches_content() {
        let store = MemoryBlobStore::new();
        let blob = store.put(b"secret content").await.unwrap();
        let ir = PromptIr::new(vec![PromptBlock::Context {
            entries: vec![ContextEntry {
                name: "doc".to_string(),
                source: ContextSource::Blob { blob: blob.clone() },
                trust: TrustLevel::Trusted,
                preview: PreviewPolicy::MetadataOnly,
            }],
        }]);
        let input = json!({});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        let messages = render(&ir, &Params::new(), &ctx).await.unwrap();
        assert!(!messages[0].content.contains("secret content"));
        assert!(messages[0].content.contains(blob.hash.short()));
    }

    #[tokio::test]
    async fn test_tool_policy_params_restrict_only() {
        let store = MemoryBlobStore::new();
        let ir = PromptIr::new(vec![PromptBlock::ToolPolicy {
            allowed_tools: vec!["search".to_string(), "fetch".to_string()],
        }]);
        let mut params = Params::new();
        params.tools = Some(ToolParams {
            // "shell" is not declared, so it must not appear.
            allowed_tools: Some(vec!["search".to_string(), "shell".to_string()]),
        });
        let input = json!({});
        let ctx = RenderContext {
            input: &input,
            variants: &[],
            blob_store: &store,
        };
        let messages = render(&ir, &params, &ctx).await.unwrap();
        assert!(messages[0].content.contains("search"));
        assert!(!messages[0].content.contains("shell"));
        assert!(!messages[0].content.contains("fetch"));
    }
}
