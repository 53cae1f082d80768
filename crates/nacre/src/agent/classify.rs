//! Request routing: answer directly, or go through the sandbox.

use std::sync::Arc;

use async_trait::async_trait;

use super::model::{InvocationRequest, ModelClient, PromptBuilder};

/// Which path a request takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Answer with a single model call, no sandbox
    Direct,
    /// Generate and run code with capabilities
    Tools,
}

/// Decides whether a request needs tools.
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Pick a route for `request`. Implementations should lean towards
    /// [`Route::Tools`] when unsure.
    async fn classify(&self, request: &InvocationRequest) -> Route;
}

/// Case-insensitive phrase matcher that forces [`Route::Tools`].
///
/// A missed tool request costs the user a wrong answer; an unneeded sandbox
/// run costs one round-trip. The phrases err on the side of tools.
#[derive(Debug, Clone, Default)]
pub struct TriggerPhrases {
    phrases: Vec<String>,
}

impl TriggerPhrases {
    /// Build a matcher. Phrases are lowercased; empty ones are dropped.
    pub fn new(phrases: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// The first phrase found in `input`, if any.
    pub fn find(&self, input: &str) -> Option<&str> {
        let input = input.to_lowercase();
        self.phrases
            .iter()
            .find(|phrase| input.contains(phrase.as_str()))
            .map(String::as_str)
    }
}

/// Classifier that asks the model.
///
/// The reply is scanned for `DIRECT` or `TOOLS`; anything else, including a
/// failed model call, routes to tools.
pub struct ModelClassifier {
    model: Arc<dyn ModelClient>,
    prompts: Arc<dyn PromptBuilder>,
}

impl std::fmt::Debug for ModelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClassifier").finish_non_exhaustive()
    }
}

impl ModelClassifier {
    /// Create a classifier backed by `model`.
    pub fn new(model: Arc<dyn ModelClient>, prompts: Arc<dyn PromptBuilder>) -> Self {
        Self { model, prompts }
    }
}

#[async_trait]
impl Classifier for ModelClassifier {
    async fn classify(&self, request: &InvocationRequest) -> Route {
        let messages = self.prompts.classify_prompt(request);
        match self.model.invoke(&messages).await {
            Ok(response) => parse_verdict(&response.content),
            Err(e) => {
                tracing::warn!(error = %e, "classification failed; routing to tools");
                Route::Tools
            }
        }
    }
}

fn parse_verdict(reply: &str) -> Route {
    let reply = reply.to_uppercase();
    if reply.contains("TOOLS") {
        Route::Tools
    } else if reply.contains("DIRECT") {
        Route::Direct
    } else {
        tracing::debug!("unrecognized classifier verdict; routing to tools");
        Route::Tools
    }
}
