//! Decode/repair pipeline: raw model text to schema-validated output.
//!
//! Stages run in order, each passing its output forward or short-circuiting
//! to repair: strip markdown fences → strict JSON parse → tolerant
//! ("jsonish") parse → schema decode. A schema or parse failure consumes a
//! repair attempt (a repair-role model call carrying the raw output and the
//! validation error) until `decode.max_repairs` is exhausted, then fails
//! with the last raw output preserved for diagnosis.
//!
//! Tool-call arguments go through [`decode_tool_args`] under the same
//! discipline — never accepted unchecked.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::budget::BudgetHandle;
use crate::domain::error::{DecodeError, DseError, Result};
use crate::domain::params::{DecodeMode, DecodeParams, ModelConfig};
use crate::lm::{LmClient, LmRole, ProviderMessage};
use crate::schema;

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutcome {
    pub value: serde_json::Value,
    pub repairs_used: u32,
}

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z0-9_-]*\s*\n(.*?)\n?```\s*$").expect("static regex")
    })
}

/// Strip a single surrounding markdown code fence, if present.
pub fn strip_fences(raw: &str) -> &str {
    match fence_regex().captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(raw),
        None => raw.trim(),
    }
}

/// Rewrite tolerable JSON deviations into strict JSON: single-quoted
/// strings, unquoted object keys, trailing commas. The rewrite is a single
/// bounded pass; anything it cannot normalize fails strict parsing
/// afterwards.
pub fn jsonish_to_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' => {
                // Copy a double-quoted string verbatim, honoring escapes.
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let sc = chars[i];
                    out.push(sc);
                    i += 1;
                    if sc == '\\' && i < chars.len() {
                        out.push(chars[i]);
                        i += 1;
                    } else if sc == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                // Convert single-quoted string to double-quoted.
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let sc = chars[i];
                    i += 1;
                    if sc == '\\' && i < chars.len() {
                        out.push('\\');
                        out.push(chars[i]);
                        i += 1;
                    } else if sc == '\'' {
                        break;
                    } else if sc == '"' {
                        out.push('\\');
                        out.push('"');
                    } else {
                        out.push(sc);
                    }
                }
                out.push('"');
            }
            ',' => {
                // Drop trailing commas before a closing bracket.
                let mut j = i + 1;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                    i += 1;
                } else {
                    out.push(c);
                    i += 1;
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                // Possible unquoted key, or a bare literal (true/false/null).
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ':' {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// One parse attempt, fence-stripped, strict-first.
fn parse_stage(raw: &str, mode: DecodeMode) -> std::result::Result<serde_json::Value, String> {
    let stripped = strip_fences(raw);
    match serde_json::from_str(stripped) {
        Ok(value) => Ok(value),
        Err(strict_err) => match mode {
            DecodeMode::StrictJson => Err(strict_err.to_string()),
            DecodeMode::Jsonish => serde_json::from_str(&jsonish_to_json(stripped))
                .map_err(|e| format!("strict: {strict_err}; jsonish: {e}")),
        },
    }
}

/// Run one raw output through parse + schema stages.
/// Returns `Err((was_parse_failure, detail))` on failure.
fn decode_stage(
    raw: &str,
    output_schema: &serde_json::Value,
    mode: DecodeMode,
) -> std::result::Result<serde_json::Value, (bool, String)> {
    let value = parse_stage(raw, mode).map_err(|detail| (true, detail))?;
    schema::check(&value, output_schema).map_err(|detail| (false, detail))?;
    Ok(value)
}

fn repair_messages(raw: &str, error_detail: &str, schema_json: &serde_json::Value) -> Vec<ProviderMessage> {
    vec![
        ProviderMessage::system(
            "The previous output was not valid. Return a corrected JSON value only, \
             with no surrounding prose or markdown fences."
                .to_string(),
        ),
        ProviderMessage::user(format!(
            "Output:\n{raw}\n\nValidation error:\n{error_detail}\n\nRequired schema:\n{schema_json}"
        )),
    ]
}

/// Decode a raw model output into a schema-validated value, with bounded
/// repair. Every repair call charges the budget as a model call.
pub async fn decode_output(
    raw: &str,
    output_schema: &serde_json::Value,
    decode: &DecodeParams,
    lm: &dyn LmClient,
    repair_model: Option<&ModelConfig>,
    budget: &BudgetHandle,
) -> Result<DecodeOutcome> {
    let mut current = raw.to_string();
    let mut repairs_used = 0u32;

    loop {
        match decode_stage(&current, output_schema, decode.mode) {
            Ok(value) => {
                return Ok(DecodeOutcome {
                    value,
                    repairs_used,
                })
            }
            Err((was_parse, detail)) => {
                if repairs_used >= decode.max_repairs {
                    return Err(if was_parse {
                        DseError::Decode(DecodeError::ParseFailed {
                            detail,
                            raw: current,
                        })
                    } else {
                        DseError::Decode(DecodeError::SchemaValidationFailed {
                            detail,
                            repairs_used,
                            last_raw: current,
                        })
                    });
                }
                budget.on_lm_call()?;
                let response = lm
                    .complete(
                        LmRole::Repair,
                        repair_model,
                        &repair_messages(&current, &detail, output_schema),
                    )
                    .await?;
                current = response.text;
                repairs_used += 1;
            }
        }
    }
}

/// Validate tool-call arguments against the tool's declared schema.
pub fn decode_tool_args(
    tool: &str,
    args: &serde_json::Value,
    args_schema: &serde_json::Value,
) -> Result<()> {
    schema::check(args, args_schema).map_err(|detail| {
        DseError::Decode(DecodeError::SchemaValidationFailed {
            detail: format!("tool {tool} arguments: {detail}"),
            repairs_used: 0,
            last_raw: args.to_string(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::budget::BudgetLimits;
    use crate::lm::ScriptedLm;
    use serde_json::json;

    fn schema() -> serde_json::Value {
        json!({"type": "object", "required": ["a"], "properties": {"a": {"type": "integer"}}})
    }

    fn strict_no_repair() -> DecodeParams {
        DecodeParams {
            mode: DecodeMode::StrictJson,
            max_repairs: 0,
        }
    }

    #[test]
    fn test_strip_fences_with_language_tag() {
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_fences_without_language_tag() {
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
    }

    #[test]
    fn test_strip_fences_passthrough() {
        assert_eq!(strip_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_jsonish_single_quotes() {
        assert_eq!(jsonish_to_json("{'a': 'b'}"), r#"{"a": "b"}"#);
    }

    #[test]
    fn test_jsonish_unquoted_keys() {
        assert_eq!(jsonish_to_json("{a: 1, b_2: 2}"), r#"{"a": 1, "b_2": 2}"#);
    }

    #[test]
    fn test_jsonish_trailing_commas() {
        assert_eq!(jsonish_to_json("[1, 2,]"), "[1, 2]");
        assert_eq!(jsonish_to_json("{\"a\": 1,}"), "{\"a\": 1}");
    }

    #[test]
    fn test_jsonish_preserves_literals() {
        assert_eq!(
            jsonish_to_json("{\"a\": true, \"b\": null}"),
            "{\"a\": true, \"b\": null}"
        );
    }

    #[test]
    fn test_jsonish_leaves_strings_untouched() {
        // A colon inside a string must not trigger key quoting.
        assert_eq!(
            jsonish_to_json(r#"{"a": "x: y, z,"}"#),
            r#"{"a": "x: y, z,"}"#
        );
    }

    #[tokio::test]
    async fn test_fenced_strict_json_zero_repairs() {
        let lm = ScriptedLm::new();
        let budget = BudgetHandle::new(BudgetLimits::default());
        let outcome = decode_output(
            "```json\n{\"a\":1}\n```",
            &schema(),
            &strict_no_repair(),
            &lm,
            None,
            &budget,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, json!({"a": 1}));
        assert_eq!(outcome.repairs_used, 0);
        assert_eq!(lm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_jsonish_mode_recovers_sloppy_output() {
        let lm = ScriptedLm::new();
        let budget = BudgetHandle::new(BudgetLimits::default());
        let outcome = decode_output(
            "{a: 1,}",
            &schema(),
            &DecodeParams::default(),
            &lm,
            None,
            &budget,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, json!({"a": 1}));
        assert_eq!(outcome.repairs_used, 0);
    }

    #[tokio::test]
    async fn test_strict_mode_does_not_tolerate_sloppy_output() {
        let lm = ScriptedLm::new();
        let budget = BudgetHandle::new(BudgetLimits::default());
        let err = decode_output("{a: 1}", &schema(), &strict_no_repair(), &lm, None, &budget)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DseError::Decode(DecodeError::ParseFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_repair_fixes_schema_failure() {
        // First output parses but misses the required field; the repair
        // role returns a valid value.
        let lm = ScriptedLm::with_responses(["{\"a\": 2}"]);
        let budget = BudgetHandle::new(BudgetLimits::default());
        let outcome = decode_output(
            "{\"b\": 1}",
            &schema(),
            &DecodeParams {
                mode: DecodeMode::Jsonish,
                max_repairs: 1,
            },
            &lm,
            None,
            &budget,
        )
        .await
        .unwrap();
        assert_eq!(outcome.value, json!({"a": 2}));
        assert_eq!(outcome.repairs_used, 1);
        assert_eq!(lm.calls_for_role(LmRole::Repair), 1);
        assert_eq!(budget.usage().lm_calls, 1);
    }

    #[tokio::test]
    async fn test_repairs_exhausted_carries_last_raw() {
        let lm = ScriptedLm::with_responses(["{\"still\": \"wrong\"}"]);
        let budget = BudgetHandle::new(BudgetLimits::default());
        let err = decode_output(
            "{\"b\": 1}",
            &schema(),
            &DecodeParams {
                mode: DecodeMode::Jsonish,
                max_repairs: 1,
            },
            &lm,
            None,
            &budget,
        )
        .await
        .unwrap_err();
        match err {
            DseError::Decode(DecodeError::SchemaValidationFailed {
                repairs_used,
                last_raw,
                ..
            }) => {
                assert_eq!(repairs_used, 1);
                assert!(last_raw.contains("still"));
            }
            other => panic!("expected SchemaValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_tool_args_validated() {
        let args_schema = json!({"type": "object", "required": ["query"]});
        assert!(decode_tool_args("search", &json!({"query": "x"}), &args_schema).is_ok());
        assert!(decode_tool_args("search", &json!({}), &args_schema).is_err());
    }
}
