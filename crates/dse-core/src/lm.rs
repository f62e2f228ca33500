//! Model-call service boundary.
//!
//! DSE never talks to a provider directly; strategies issue calls through
//! the [`LmClient`] trait, parameterized by role. [`ScriptedLm`] is the
//! in-memory test double that satisfies the contract with canned responses
//! and records every call for assertions.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::{DseError, Result};
use crate::domain::params::ModelConfig;

/// Which configured model a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmRole {
    Main,
    Sub,
    Repair,
    Judge,
}

impl std::fmt::Display for LmRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LmRole::Main => "main",
            LmRole::Sub => "sub",
            LmRole::Repair => "repair",
            LmRole::Judge => "judge",
        };
        write!(f, "{s}")
    }
}

/// Chat-message role in provider wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One rendered provider message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ProviderMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Raw completion returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmResponse {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Role-parameterized model-call service.
#[async_trait]
pub trait LmClient: Send + Sync {
    /// Issue one completion. `config` carries the per-role model settings
    /// resolved from params, if any.
    async fn complete(
        &self,
        role: LmRole,
        config: Option<&ModelConfig>,
        messages: &[ProviderMessage],
    ) -> Result<LmResponse>;
}

/// Record of one call made against [`ScriptedLm`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub role: LmRole,
    pub messages: Vec<ProviderMessage>,
}

/// Test double: pops canned responses in order and records every call.
#[derive(Debug, Default)]
pub struct ScriptedLm {
    responses: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with a fixed response script, consumed front to back.
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Append a response to the script.
    pub fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().unwrap().push_back(response.into());
    }

    /// Total calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Calls made with a given role.
    pub fn calls_for_role(&self, role: LmRole) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.role == role)
            .count()
    }

    /// Copy of the recorded calls.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LmClient for ScriptedLm {
    async fn complete(
        &self,
        role: LmRole,
        _config: Option<&ModelConfig>,
        messages: &[ProviderMessage],
    ) -> Result<LmResponse> {
        self.calls.lock().unwrap().push(RecordedCall {
            role,
            messages: messages.to_vec(),
        });
        let text = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DseError::LmCall("scripted response queue exhausted".to_string()))?;
        Ok(LmResponse { text, model: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_lm_pops_in_order() {
        let lm = ScriptedLm::with_responses(["first", "second"]);
        let r1 = lm
            .complete(LmRole::Main, None, &[ProviderMessage::user("q")])
            .await
            .unwrap();
        let r2 = lm
            .complete(LmRole::Sub, None, &[ProviderMessage::user("q")])
            .await
            .unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
        assert_eq!(lm.call_count(), 2);
        assert_eq!(lm.calls_for_role(LmRole::Sub), 1);
    }

    #[tokio::test]
    async fn test_scripted_lm_exhausted_errors() {
        let lm = ScriptedLm::new();
        let err = lm
            .complete(LmRole::Main, None, &[ProviderMessage::user("q")])
            .await
            .unwrap_err();
        assert!(matches!(err, DseError::LmCall(_)));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(LmRole::Repair.to_string(), "repair");
    }
}
