//! Capability bridge between host and isolate.
//!
//! The bridge installs a fixed set of globals into a fresh isolate:
//!
//! ```text
//! webSearch(...), notify(...), ...   one async function per supplied capability
//! finalAnswer(text)                  latches the run's terminal answer
//! console.log/info/debug             captured stdout
//! console.warn/error                 captured stderr
//! ```
//!
//! Nothing else from the host is reachable. Calls are copy-in/copy-out:
//! arguments are JSON-encoded inside the isolate, handed to the host
//! [`Capability`] as a [`serde_json::Value`], and the result travels back the
//! same way. A capability error is re-thrown inside the script as an `Error`
//! carrying the same message.

mod capability;
pub(crate) mod ops;

pub use capability::{Capability, CapabilityError, CapabilityName, CapabilitySet};

/// Bootstrap script; a function expression taking `(ops, names)`.
const BOOTSTRAP: &str = include_str!("bootstrap.js");

/// Build the install script for a capability set.
pub(crate) fn bootstrap_source(capabilities: &CapabilitySet) -> String {
    let names: Vec<&'static str> = capabilities.names().map(|n| n.as_str()).collect();
    // Names come from a closed vocabulary of plain identifiers, so the JSON
    // array is also a valid JS array literal.
    let names = serde_json::Value::from(names);
    format!("{BOOTSTRAP}(Deno.core.ops, {names});")
}

/// Wrap a snippet in the async entry point installed by the bootstrap.
pub(crate) fn entry_source(snippet: &str) -> String {
    format!("__nacreEnter(async () => {{\n{snippet}\n}});")
}
