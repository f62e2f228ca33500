//! Per-run variable space.
//!
//! Vars hold either inline JSON or a blob reference; the kernel is the
//! only writer. The space is scoped to one run and dropped with it —
//! nothing here outlives the trace.

use std::collections::BTreeMap;

use dse_state::BlobRef;
use serde::{Deserialize, Serialize};

/// A value bound to a var name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Blob(BlobRef),
    Json(serde_json::Value),
}

/// Named values scoped to one kernel run.
///
/// Backed by a `BTreeMap` so iteration order (and therefore search result
/// order) is deterministic.
#[derive(Debug, Default)]
pub struct VarSpace {
    vars: BTreeMap<String, VarValue>,
}

impl VarSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, name: impl Into<String>, value: VarValue) {
        self.vars.insert(name.into(), value);
    }

    pub fn read(&self, name: &str) -> Option<&VarValue> {
        self.vars.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &VarValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dse_state::ContentHash;
    use serde_json::json;

    #[test]
    fn test_write_read_overwrite() {
        let mut space = VarSpace::new();
        space.write("x", VarValue::Json(json!(1)));
        space.write("x", VarValue::Json(json!(2)));
        assert_eq!(space.read("x"), Some(&VarValue::Json(json!(2))));
        assert_eq!(space.len(), 1);
        assert!(space.read("missing").is_none());
    }

    #[test]
    fn test_iteration_order_is_sorted() {
        let mut space = VarSpace::new();
        space.write("b", VarValue::Json(json!(1)));
        space.write("a", VarValue::Json(json!(2)));
        let names: Vec<_> = space.names().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_var_value_serde_distinguishes_blob() {
        let blob = VarValue::Blob(BlobRef {
            hash: ContentHash::from_bytes(b"doc"),
            size_bytes: 3,
            media_type: None,
        });
        let json = serde_json::to_value(&blob).unwrap();
        let back: VarValue = serde_json::from_value(json).unwrap();
        assert_eq!(blob, back);
    }
}
