//! Code Agent Example
//!
//! Demonstrates the CodeAgent loop with a canned model: the first reply
//! throws, the retry prompt carries the failure back, and the second reply
//! uses a capability to produce the answer.
//!
//! Run with: cargo run -p nacre --example code_agent

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use nacre::agent::{
    AttemptFeedback, CodeAgent, InvocationRequest, Message, ModelClient, ModelError,
    ModelResponse, PromptBuilder,
};
use nacre::{AgentConfig, CapabilityError, CapabilityName, CapabilitySet};
use serde_json::{Value, json};

const FIRST_REPLY: &str = r#"Let me look that up.

```javascript
const hits = await webSearch({ q: "rust 2024 edition" });
finalAnswer(hits.first.title);
```
"#;

const SECOND_REPLY: &str = r#"Fixed the field name.

```javascript
const hits = await webSearch({ q: "rust 2024 edition" });
console.log(`got ${hits.length} hits`);
finalAnswer(hits[0].title);
```
"#;

/// Model stand-in that replays two replies.
#[derive(Debug, Default)]
struct CannedModel {
    calls: AtomicUsize,
}

#[async_trait]
impl ModelClient for CannedModel {
    async fn invoke(&self, messages: &[Message]) -> Result<ModelResponse, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        println!("--- prompt #{} ---", call + 1);
        for message in messages {
            println!("[{:?}] {}", message.role, message.content);
        }
        println!();

        let reply = if call == 0 { FIRST_REPLY } else { SECOND_REPLY };
        Ok(ModelResponse::new(reply))
    }
}

#[derive(Debug)]
struct Prompts;

impl PromptBuilder for Prompts {
    fn code_prompt(
        &self,
        request: &InvocationRequest,
        feedback: Option<&AttemptFeedback>,
    ) -> Vec<Message> {
        let mut messages = vec![
            Message::system(
                "Answer with one ```javascript block. Available: webSearch(args). \
                 End with finalAnswer(text).",
            ),
            Message::user(request.user_input.clone()),
        ];
        if let Some(feedback) = feedback {
            messages.push(Message::user(format!(
                "Your previous script failed: {}\nOutput:\n{}",
                feedback.error, feedback.output
            )));
        }
        messages
    }

    fn direct_prompt(&self, request: &InvocationRequest) -> Vec<Message> {
        vec![Message::user(request.user_input.clone())]
    }

    fn classify_prompt(&self, request: &InvocationRequest) -> Vec<Message> {
        vec![
            Message::system("Reply DIRECT or TOOLS."),
            Message::user(request.user_input.clone()),
        ]
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Code Agent Example ===\n");

    let capabilities = CapabilitySet::new().with(CapabilityName::WebSearch, |args: Value| async move {
        Ok::<_, CapabilityError>(json!([
            { "title": "Rust 2024 is stable", "query": args["q"] },
        ]))
    })?;

    let agent = CodeAgent::builder(Arc::new(CannedModel::default()), Arc::new(Prompts))
        .capabilities(capabilities)
        .config(AgentConfig::default())
        .build()?;

    let reply = agent
        .answer(&InvocationRequest::new("What's new in the Rust 2024 edition?"))
        .await;

    println!("Outcome:  {:?}", reply.outcome);
    println!("Attempts: {}", reply.attempts);
    println!("Answer:   {}", reply.text);

    Ok(())
}
