//! Controller action DSL.
//!
//! The controller model emits exactly one JSON action per iteration,
//! discriminated by the `action` tag. The enum is closed: anything that
//! does not deserialize into it is a terminal `MalformedAction`, never a
//! free-form tool call.

use serde::{Deserialize, Serialize};

use crate::decode::strip_fences;
use crate::domain::error::{DseError, Result};

/// Where `search` looks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// Inline JSON values in the var space.
    #[default]
    Vars,
    /// Blob-backed values in the var space.
    Blob,
}

/// One controller action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case", deny_unknown_fields)]
pub enum Action {
    /// Bounded look at a var without loading it whole.
    Preview {
        var: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_chars: Option<usize>,
    },
    /// Substring scan across the var space.
    Search {
        query: String,
        #[serde(default)]
        scope: SearchScope,
    },
    /// Load a var's full content into the result stream.
    Load { var: String },
    /// Split a var's text into overlapping chunks, stored under `target`.
    /// Sizes fall back to the run's kernel tuning when omitted.
    Chunk {
        var: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_chars: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overlap_chars: Option<usize>,
    },
    /// Write a JSON value into the var space.
    WriteVar {
        var: String,
        value: serde_json::Value,
    },
    /// Fan a sub-model instruction out over the chunks of a var.
    ExtractOverChunks {
        var: String,
        instruction: String,
        target: String,
    },
    /// One sub-model call.
    SubLm {
        prompt: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Invoke an allowlisted tool.
    ToolCall {
        tool: String,
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
    },
    /// Hand the payload to decode and end the run.
    Final { output: serde_json::Value },
}

impl Action {
    /// Stable tag string for trace and log lines.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Preview { .. } => "preview",
            Action::Search { .. } => "search",
            Action::Load { .. } => "load",
            Action::Chunk { .. } => "chunk",
            Action::WriteVar { .. } => "write_var",
            Action::ExtractOverChunks { .. } => "extract_over_chunks",
            Action::SubLm { .. } => "sub_lm",
            Action::ToolCall { .. } => "tool_call",
            Action::Final { .. } => "final",
        }
    }
}

/// Parse one controller response into an action.
pub fn parse_action(raw: &str) -> Result<Action> {
    let stripped = strip_fences(raw);
    serde_json::from_str(stripped).map_err(|e| DseError::MalformedAction {
        detail: format!("{e}; raw: {stripped}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tagged_actions() {
        let action = parse_action(r#"{"action": "load", "var": "doc"}"#).unwrap();
        assert_eq!(
            action,
            Action::Load {
                var: "doc".to_string()
            }
        );

        let action =
            parse_action(r#"{"action": "final", "output": {"answer": "x"}}"#).unwrap();
        assert_eq!(
            action,
            Action::Final {
                output: json!({"answer": "x"})
            }
        );
    }

    #[test]
    fn test_parse_chunk_sizes_are_optional() {
        let action = parse_action(r#"{"action": "chunk", "var": "doc", "target": "parts"}"#).unwrap();
        assert_eq!(
            action,
            Action::Chunk {
                var: "doc".to_string(),
                target: "parts".to_string(),
                chunk_chars: None,
                overlap_chars: None,
            }
        );

        let action = parse_action(
            r#"{"action": "chunk", "var": "doc", "target": "parts", "chunk_chars": 500, "overlap_chars": 50}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            Action::Chunk {
                var: "doc".to_string(),
                target: "parts".to_string(),
                chunk_chars: Some(500),
                overlap_chars: Some(50),
            }
        );
    }

    #[test]
    fn test_parse_strips_fences() {
        let raw = "```json\n{\"action\": \"search\", \"query\": \"total\"}\n```";
        let action = parse_action(raw).unwrap();
        assert_eq!(
            action,
            Action::Search {
                query: "total".to_string(),
                scope: SearchScope::Vars,
            }
        );
    }

    #[test]
    fn test_unknown_action_tag_is_malformed() {
        let err = parse_action(r#"{"action": "rm_rf", "path": "/"}"#).unwrap_err();
        assert!(matches!(err, DseError::MalformedAction { .. }));
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let err = parse_action(r#"{"action": "load", "var": "doc", "mode": "raw"}"#).unwrap_err();
        assert!(matches!(err, DseError::MalformedAction { .. }));
    }

    #[test]
    fn test_non_json_is_malformed() {
        let err = parse_action("I think we should load the doc").unwrap_err();
        assert!(matches!(err, DseError::MalformedAction { .. }));
    }

    #[test]
    fn test_action_serde_roundtrip() {
        let action = Action::ExtractOverChunks {
            var: "doc".to_string(),
            instruction: "list invoice totals".to_string(),
            target: "totals".to_string(),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains(r#""action":"extract_over_chunks""#));
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(action, back);
    }
}
