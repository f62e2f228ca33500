//! Tool execution boundary.
//!
//! Tools run outside the engine; the kernel only sees the [`ToolExecutor`]
//! trait. Allowlist enforcement happens in the kernel *before* this
//! boundary is crossed — an executor never receives a call for a tool the
//! signature did not declare.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::Result;

/// A tool declaration: name plus an argument schema the kernel validates
/// call arguments against, under the same discipline as final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContract {
    pub name: String,
    pub args_schema: serde_json::Value,
}

/// External tool execution service.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute a named tool with schema-validated arguments.
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<serde_json::Value>;
}

/// Test double: echoes the call back and records it.
#[derive(Debug, Default)]
pub struct EchoToolExecutor {
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl EchoToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn recorded_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolExecutor for EchoToolExecutor {
    async fn execute(&self, name: &str, args: &serde_json::Value) -> Result<serde_json::Value> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone()));
        Ok(serde_json::json!({"tool": name, "args": args}))
    }
}
