//! The code-agent controller: generate, run, decide, retry.

use std::sync::Arc;

use super::budget::ExecutionBudget;
use super::classify::{Classifier, ModelClassifier, Route, TriggerPhrases};
use super::model::{
    AttemptFeedback, CapabilitySupplier, InvocationRequest, ModelClient, PromptBuilder,
};
use crate::bridge::CapabilitySet;
use crate::config::{AgentConfig, ConfigError};
use crate::executor::Sandbox;
use crate::extract::extract_code;
use crate::runtime::ScriptRunner;

/// Reply when the model never produced a runnable snippet.
pub const NO_CODE_MESSAGE: &str =
    "Sorry, I couldn't generate runnable code for that request. Please try rephrasing it.";

/// Reply when every attempt produced code that failed.
pub const EXHAUSTED_MESSAGE: &str =
    "Sorry, I couldn't complete that request after several attempts. Please check the logs for details.";

/// Reply when the request ran out of time.
pub const TIMEOUT_MESSAGE: &str = "Sorry, that request took too long to complete.";

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A script produced an answer
    Answered,
    /// The model answered directly, without the sandbox
    Direct,
    /// No attempt produced runnable code
    NoCode,
    /// Attempts ran out
    Exhausted,
    /// The total deadline passed
    TimedOut,
}

/// The user-facing result of [`CodeAgent::answer`].
///
/// `text` is either an answer or one of the fixed messages; internal error
/// detail is logged, never returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    /// Text to show the user
    pub text: String,
    /// How the request ended
    pub outcome: Outcome,
    /// Attempts started (generation or sandbox), the direct path excluded
    pub attempts: u32,
}

impl AgentReply {
    fn new(text: impl Into<String>, outcome: Outcome, attempts: u32) -> Self {
        Self {
            text: text.into(),
            outcome,
            attempts,
        }
    }

    fn timed_out(attempts: u32) -> Self {
        Self::new(TIMEOUT_MESSAGE, Outcome::TimedOut, attempts)
    }
}

/// Which failure ended the most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    NoCode,
    Model,
    Script,
}

/// Builder for [`CodeAgent`].
pub struct CodeAgentBuilder {
    model: Arc<dyn ModelClient>,
    prompts: Arc<dyn PromptBuilder>,
    capabilities: Arc<dyn CapabilitySupplier>,
    runner: Option<Arc<dyn ScriptRunner>>,
    classifier: Option<Arc<dyn Classifier>>,
    config: AgentConfig,
}

impl std::fmt::Debug for CodeAgentBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeAgentBuilder")
            .field("config", &self.config)
            .field("has_runner", &self.runner.is_some())
            .field("has_classifier", &self.classifier.is_some())
            .finish_non_exhaustive()
    }
}

impl CodeAgentBuilder {
    /// Set the capability supplier. Defaults to an empty capability set.
    pub fn capabilities(mut self, supplier: impl CapabilitySupplier + 'static) -> Self {
        self.capabilities = Arc::new(supplier);
        self
    }

    /// Set the script runner. Defaults to a [`Sandbox`] built from the config.
    pub fn runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the classifier used when `classify` is enabled.
    ///
    /// Defaults to a [`ModelClassifier`] over the agent's own model.
    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Set the configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and build the agent.
    pub fn build(self) -> Result<CodeAgent, ConfigError> {
        self.config.validate()?;

        let runner: Arc<dyn ScriptRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(Sandbox::new(self.config.sandbox_limits())),
        };
        let classifier = match (self.config.classify, self.classifier) {
            (false, _) => None,
            (true, Some(classifier)) => Some(classifier),
            (true, None) => Some(Arc::new(ModelClassifier::new(
                Arc::clone(&self.model),
                Arc::clone(&self.prompts),
            )) as Arc<dyn Classifier>),
        };
        let triggers = TriggerPhrases::new(&self.config.trigger_phrases);

        Ok(CodeAgent {
            model: self.model,
            prompts: self.prompts,
            capabilities: self.capabilities,
            runner,
            classifier,
            triggers,
            config: self.config,
        })
    }
}

/// Drives generate-run-decide attempts for a request.
///
/// Each call to [`answer`](Self::answer) is one logical flow: attempts run
/// strictly one after another, each in a fresh isolate, within
/// `max_attempts` and `total_timeout`. A sandbox run never gets more than
/// `min(step_timeout, time left)`.
///
/// # Example
///
/// ```rust,ignore
/// use nacre::agent::CodeAgent;
///
/// let agent = CodeAgent::builder(model, prompts)
///     .capabilities(capabilities)
///     .config(AgentConfig::load("nacre.json")?)
///     .build()?;
///
/// let reply = agent.answer(&InvocationRequest::new("what's the weather?")).await;
/// println!("{}", reply.text);
/// ```
pub struct CodeAgent {
    model: Arc<dyn ModelClient>,
    prompts: Arc<dyn PromptBuilder>,
    capabilities: Arc<dyn CapabilitySupplier>,
    runner: Arc<dyn ScriptRunner>,
    classifier: Option<Arc<dyn Classifier>>,
    triggers: TriggerPhrases,
    config: AgentConfig,
}

impl std::fmt::Debug for CodeAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CodeAgent {
    /// Start building an agent over a model and prompt builder.
    pub fn builder(
        model: Arc<dyn ModelClient>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> CodeAgentBuilder {
        CodeAgentBuilder {
            model,
            prompts,
            capabilities: Arc::new(CapabilitySet::new()),
            runner: None,
            classifier: None,
            config: AgentConfig::default(),
        }
    }

    /// The agent's configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer a request.
    ///
    /// Never fails: model errors and script errors consume attempts, and the
    /// reply falls back to one of the fixed messages.
    pub async fn answer(&self, request: &InvocationRequest) -> AgentReply {
        let mut budget = ExecutionBudget::new(
            self.config.max_attempts,
            self.config.total_timeout,
            self.config.step_timeout,
        );

        // Code the model wrote on the direct path, run as the first attempt.
        let mut pending = None;
        if self.classifier.is_some() {
            match self.try_direct(request, &budget).await {
                DirectPath::Answered(text) => return AgentReply::new(text, Outcome::Direct, 0),
                DirectPath::TimedOut => return AgentReply::timed_out(0),
                DirectPath::Code(code) => pending = Some(code),
                DirectPath::Tools => {}
            }
        }

        let capabilities = self.capabilities.capabilities(request);
        let mut attempts = 0;
        let mut feedback: Option<AttemptFeedback> = None;
        let mut last_failure = Failure::NoCode;

        while budget.start_attempt() {
            attempts += 1;

            let snippet = match pending.take() {
                Some(code) => code,
                None => {
                    if budget.is_expired() {
                        tracing::warn!(attempt = attempts, "deadline reached before generation");
                        return AgentReply::timed_out(attempts);
                    }

                    tracing::info!(attempt = attempts, "generating script");
                    let messages = self.prompts.code_prompt(request, feedback.as_ref());
                    let response =
                        match tokio::time::timeout(budget.remaining(), self.model.invoke(&messages))
                            .await
                        {
                            Err(_) => {
                                tracing::warn!(attempt = attempts, "deadline reached during generation");
                                return AgentReply::timed_out(attempts);
                            }
                            Ok(Err(e)) => {
                                tracing::warn!(attempt = attempts, error = %e, "model invocation failed");
                                last_failure = Failure::Model;
                                continue;
                            }
                            Ok(Ok(response)) => response,
                        };

                    match extract_code(&response.content) {
                        Some(code) => code,
                        None => {
                            tracing::info!(attempt = attempts, "model output contained no code");
                            last_failure = Failure::NoCode;
                            continue;
                        }
                    }
                }
            };

            if budget.is_expired() {
                tracing::warn!(attempt = attempts, "deadline reached before sandbox run");
                return AgentReply::timed_out(attempts);
            }

            let timeout = budget.next_timeout();
            tracing::info!(
                attempt = attempts,
                timeout_ms = timeout.as_millis() as u64,
                "running script"
            );
            let mut result = self.runner.run(&snippet, &capabilities, timeout).await;

            if let Some(answer) = result.terminal_answer.take() {
                tracing::info!(attempt = attempts, "script produced an answer");
                return AgentReply::new(answer, Outcome::Answered, attempts);
            }

            let error = match (result.error.take(), result.raw_return_value.take()) {
                (Some(error), _) => error,
                (None, Some(value)) => {
                    tracing::info!(attempt = attempts, "using script return value as answer");
                    return AgentReply::new(render_value(value), Outcome::Answered, attempts);
                }
                (None, None) => "script finished without calling finalAnswer".to_string(),
            };

            tracing::warn!(attempt = attempts, error = %error, "script attempt failed");
            last_failure = Failure::Script;
            feedback = Some(AttemptFeedback {
                attempt: attempts,
                error,
                output: result.combined_output(self.config.max_output_chars),
            });
        }

        match last_failure {
            Failure::NoCode => {
                tracing::warn!(attempts, "no runnable code produced");
                AgentReply::new(NO_CODE_MESSAGE, Outcome::NoCode, attempts)
            }
            Failure::Model | Failure::Script => {
                tracing::warn!(attempts, "attempts exhausted");
                AgentReply::new(EXHAUSTED_MESSAGE, Outcome::Exhausted, attempts)
            }
        }
    }

    /// Classify the request and, on the direct route, ask for a plain answer.
    async fn try_direct(&self, request: &InvocationRequest, budget: &ExecutionBudget) -> DirectPath {
        let route = match (self.triggers.find(&request.user_input), &self.classifier) {
            (Some(phrase), _) => {
                tracing::debug!(phrase, "trigger phrase forces tools");
                Route::Tools
            }
            (None, Some(classifier)) => {
                match tokio::time::timeout(budget.remaining(), classifier.classify(request)).await {
                    Ok(route) => route,
                    Err(_) => return DirectPath::TimedOut,
                }
            }
            (None, None) => Route::Tools,
        };
        tracing::info!(?route, "request classified");

        if route == Route::Tools {
            return DirectPath::Tools;
        }

        let messages = self.prompts.direct_prompt(request);
        match tokio::time::timeout(budget.remaining(), self.model.invoke(&messages)).await {
            Err(_) => DirectPath::TimedOut,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "direct answer failed; falling back to tools");
                DirectPath::Tools
            }
            Ok(Ok(response)) => match extract_code(&response.content) {
                Some(code) => {
                    tracing::info!("direct answer contained code; running it in the sandbox");
                    DirectPath::Code(code)
                }
                None => DirectPath::Answered(response.content),
            },
        }
    }
}

enum DirectPath {
    Answered(String),
    Code(String),
    Tools,
    TimedOut,
}

fn render_value(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(json!("plain")), "plain");
        assert_eq!(render_value(json!(42)), "42");
        assert_eq!(render_value(json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_fixed_messages_are_distinct() {
        assert_ne!(NO_CODE_MESSAGE, EXHAUSTED_MESSAGE);
        assert_ne!(EXHAUSTED_MESSAGE, TIMEOUT_MESSAGE);
    }
}
