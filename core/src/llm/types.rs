use serde::{Deserialize, Serialize};

use crate::error::LlmErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Optional, model-specific request fields. Dropped entirely in
/// reduced-parameter mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TuningParams {
    pub disable_thinking: bool,
}

/// One request against one concrete model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// `None` means reduced-parameter mode.
    #[serde(default)]
    pub tuning: Option<TuningParams>,
}

impl ChatRequest {
    pub fn is_reduced(&self) -> bool {
        self.tuning.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Retryable(LlmErrorKind),
    Fatal(LlmErrorKind),
}

/// Ephemeral record of one try against one model. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationAttempt {
    pub model: String,
    pub reduced: bool,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}
