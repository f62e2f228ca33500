//! JSON schema subset validation for signature contracts.
//!
//! Signatures declare input/output contracts as plain JSON values using a
//! JSON-Schema-style subset: `type`, `properties`, `required`, `items`,
//! `enum`. That subset is enough to gate decode output and tool-call
//! arguments without pulling a full draft validator into the engine.
//!
//! Violations carry an RFC 6901-style pointer to the offending location.

use serde_json::Value;

/// A single schema violation with a JSON-pointer path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// RFC 6901 pointer into the validated value (`""` is the root).
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(declared: &str, value: &Value) -> bool {
    match declared {
        // Every integer is a number.
        "number" => matches!(value, Value::Number(_)),
        "integer" => matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()),
        other => type_name(value) == other,
    }
}

fn walk(value: &Value, schema: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    let schema_obj = match schema {
        Value::Object(map) => map,
        // Boolean schemas: `true` accepts anything, `false` rejects everything.
        Value::Bool(true) => return,
        Value::Bool(false) => {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: "schema rejects all values".to_string(),
            });
            return;
        }
        _ => {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: "schema must be an object or boolean".to_string(),
            });
            return;
        }
    };

    if let Some(Value::String(declared)) = schema_obj.get("type") {
        if !type_matches(declared, value) {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: format!("expected {}, got {}", declared, type_name(value)),
            });
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema_obj.get("enum") {
        if !allowed.contains(value) {
            out.push(SchemaViolation {
                path: path.to_string(),
                message: format!("value not in enum: {}", value),
            });
            return;
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema_obj.get("required") {
            for req in required {
                if let Value::String(name) = req {
                    if !fields.contains_key(name) {
                        out.push(SchemaViolation {
                            path: path.to_string(),
                            message: format!("missing required field: {}", name),
                        });
                    }
                }
            }
        }
        if let Some(Value::Object(props)) = schema_obj.get("properties") {
            for (name, sub_schema) in props {
                if let Some(sub_value) = fields.get(name) {
                    let sub_path = format!("{}/{}", path, name.replace('~', "~0").replace('/', "~1"));
                    walk(sub_value, sub_schema, &sub_path, out);
                }
            }
        }
    }

    if let Value::Array(items) = value {
        if let Some(item_schema) = schema_obj.get("items") {
            for (i, item) in items.iter().enumerate() {
                let sub_path = format!("{}/{}", path, i);
                walk(item, item_schema, &sub_path, out);
            }
        }
    }
}

/// Validate `value` against `schema`, returning all violations found.
pub fn validate(value: &Value, schema: &Value) -> Vec<SchemaViolation> {
    let mut out = Vec::new();
    walk(value, schema, "", &mut out);
    out
}

/// Validate and collapse violations into a single error message.
pub fn check(value: &Value, schema: &Value) -> std::result::Result<(), String> {
    let violations = validate(value, schema);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join("; "))
    }
}
