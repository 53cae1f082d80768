//! Run results and the script-runner seam

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bridge::CapabilitySet;
use crate::limits::truncate_chars;

/// Errors that can end a sandbox run.
///
/// These never escape [`Sandbox::run`](crate::Sandbox::run); they are
/// rendered into [`RunResult::error`] through `Display`.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Wall-clock timeout exceeded
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout that was in force for the run
        timeout_ms: u64,
    },
    /// V8 heap ceiling reached
    #[error("memory limit exceeded ({limit_mb} MB)")]
    MemoryLimit {
        /// The configured ceiling in megabytes
        limit_mb: u64,
    },
    /// Snippet larger than the configured maximum
    #[error("script too large: {size} bytes (max {max})")]
    ScriptTooLarge {
        /// Size of the rejected snippet
        size: usize,
        /// Configured maximum
        max: usize,
    },
    /// Compile error or uncaught exception inside the isolate
    #[error("{0}")]
    Script(String),
    /// Failure setting up the isolate or its host thread
    #[error("sandbox setup failed: {0}")]
    Setup(String),
}

/// Statistics about a sandbox run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Wall clock time in milliseconds, teardown included
    pub wall_time_ms: u64,
    /// Number of capability calls that reached the host
    pub capability_calls: usize,
}

/// Result of one sandbox run.
///
/// `terminal_answer` and `error` are the authoritative fields; at most one
/// of them is set. `raw_return_value` is a best-effort fallback for scripts
/// that compute a value without calling `finalAnswer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Value latched by the first `finalAnswer` call
    pub terminal_answer: Option<String>,
    /// The script's own return value, when it could be copied out
    pub raw_return_value: Option<serde_json::Value>,
    /// Lines written through `console.log` and friends
    pub stdout: Vec<String>,
    /// Lines written through `console.error` and `console.warn`
    pub stderr: Vec<String>,
    /// Why the run failed, if it did
    pub error: Option<String>,
    /// Whether captured output hit the character budget
    pub output_truncated: bool,
    /// Execution statistics
    pub stats: RunStats,
}

impl RunResult {
    /// Build a result for a run that failed before or during execution.
    pub fn failed(error: &SandboxError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Returns true if the run latched a terminal answer.
    pub fn is_answered(&self) -> bool {
        self.terminal_answer.is_some()
    }

    /// Captured stdout and stderr as one block, cut to `max_chars` characters.
    ///
    /// This is the form handed back to the model when a run is retried.
    pub fn combined_output(&self, max_chars: usize) -> String {
        let mut output = self.stdout.join("\n");
        if !self.stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str(&self.stderr.join("\n"));
        }
        truncate_chars(&output, max_chars).to_string()
    }
}

/// Something that can run a script snippet against a capability set.
///
/// [`Sandbox`](crate::Sandbox) is the production implementation; the
/// controller only depends on this trait.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `snippet` with the given capabilities under `timeout`.
    ///
    /// Implementations must not fail: every error is reported in the result.
    async fn run(
        &self,
        snippet: &str,
        capabilities: &CapabilitySet,
        timeout: Duration,
    ) -> RunResult;
}
