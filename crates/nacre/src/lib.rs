//! Nacre: sandboxed execution for code-writing agents
//!
//! Nacre runs model-written JavaScript inside disposable V8 isolates. A script
//! can reach the host only through a closed set of capability functions,
//! copied in and out as JSON, and ends by calling `finalAnswer(text)`. The
//! [`agent`] module wraps the sandbox in a retry loop with a shrinking time
//! budget.

pub mod agent;
mod bridge;
mod config;
mod executor;
mod extract;
mod limits;
mod runtime;

#[cfg(test)]
mod tests;

pub use bridge::{Capability, CapabilityError, CapabilityName, CapabilitySet};
pub use config::{AgentConfig, ConfigError, DEFAULT_TRIGGER_PHRASES};
pub use executor::Sandbox;
pub use extract::{extract_code, lazy_return};
pub use limits::{ResourceLimits, truncate_chars};
pub use runtime::{RunResult, RunStats, SandboxError, ScriptRunner};
