//! Collaborator contracts the controller is built against.
//!
//! The controller never talks to a model provider, writes prompt text, or
//! implements a tool. It calls out through these traits instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::CapabilitySet;

/// Speaker of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the model
    System,
    /// The end user
    User,
    /// The model
    Assistant,
}

/// One message of a prompt or of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl Message {
    /// Create a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A user request and the conversation that led to it.
///
/// Owned by the caller; the controller only reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// The message being answered
    pub user_input: String,
    /// Earlier messages, oldest first
    #[serde(default)]
    pub history: Vec<Message>,
}

impl InvocationRequest {
    /// A request with no history.
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            history: Vec::new(),
        }
    }

    /// Attach conversation history.
    pub fn with_history(mut self, history: impl IntoIterator<Item = Message>) -> Self {
        self.history.extend(history);
        self
    }
}

/// What the previous attempt left behind, for the next prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFeedback {
    /// 1-based number of the attempt that failed
    pub attempt: u32,
    /// Why it failed
    pub error: String,
    /// Captured output, already cut to the configured character budget
    pub output: String,
}

/// A model completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// The completion text
    pub content: String,
}

impl ModelResponse {
    /// Create a response.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Failure invoking the model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The provider rejected or failed the request
    #[error("model request failed: {0}")]
    Request(String),
    /// The provider answered with something unusable
    #[error("invalid model response: {0}")]
    InvalidResponse(String),
    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Invokes a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send the prompt and wait for the completion.
    async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, ModelError>;
}

/// Builds prompts. Prompt text lives entirely in the implementation.
pub trait PromptBuilder: Send + Sync {
    /// Prompt asking for one fenced JavaScript snippet.
    ///
    /// `feedback` is set when retrying after a failed attempt.
    fn code_prompt(
        &self,
        request: &InvocationRequest,
        feedback: Option<&AttemptFeedback>,
    ) -> Vec<Message>;

    /// Prompt asking for a plain answer without tools.
    fn direct_prompt(&self, request: &InvocationRequest) -> Vec<Message>;

    /// Prompt asking whether the request needs tools.
    ///
    /// Used by [`ModelClassifier`](super::ModelClassifier); the reply should
    /// contain `DIRECT` or `TOOLS`.
    fn classify_prompt(&self, request: &InvocationRequest) -> Vec<Message>;
}

/// Supplies the capability set for a request.
pub trait CapabilitySupplier: Send + Sync {
    /// Capabilities to bridge into every run made for `request`.
    fn capabilities(&self, request: &InvocationRequest) -> CapabilitySet;
}

impl CapabilitySupplier for CapabilitySet {
    fn capabilities(&self, _request: &InvocationRequest) -> CapabilitySet {
        self.clone()
    }
}
