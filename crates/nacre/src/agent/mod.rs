//! The code-agent controller and the contracts it depends on.
//!
//! A [`CodeAgent`] answers one [`InvocationRequest`] at a time:
//!
//! 1. optionally classify the request and answer simple ones directly
//! 2. ask the model for a fenced JavaScript snippet
//! 3. run it through a [`ScriptRunner`](crate::ScriptRunner)
//! 4. accept the answer, or retry with the failure fed back to the model
//!
//! Attempts and wall-clock time are tracked by an [`ExecutionBudget`].

mod budget;
mod classify;
mod controller;
mod model;

pub use budget::ExecutionBudget;
pub use classify::{Classifier, ModelClassifier, Route, TriggerPhrases};
pub use controller::{
    AgentReply, CodeAgent, CodeAgentBuilder, EXHAUSTED_MESSAGE, NO_CODE_MESSAGE, Outcome,
    TIMEOUT_MESSAGE,
};
pub use model::{
    AttemptFeedback, CapabilitySupplier, InvocationRequest, Message, ModelClient, ModelError,
    ModelResponse, PromptBuilder, Role,
};
