//! deno_core ops backing the bridge.
//!
//! Every op takes and returns strings: values cross the isolate boundary as
//! JSON text and are parsed on the other side, so neither side can hold a
//! reference into the other.

use std::cell::RefCell;
use std::rc::Rc;

use deno_core::{OpState, op2};
use serde_json::{Value, json};

use super::capability::{CapabilityName, CapabilitySet};
use crate::limits::{OutputLog, Stream};

/// Per-run configuration visible to the ops.
#[derive(Debug)]
pub(crate) struct BridgeContext {
    pub(crate) capabilities: CapabilitySet,
    pub(crate) max_calls: usize,
}

/// Everything a run writes back across the boundary.
#[derive(Debug)]
pub(crate) struct RunCapture {
    pub(crate) terminal_answer: Option<String>,
    pub(crate) raw_return: Option<Value>,
    pub(crate) script_error: Option<String>,
    pub(crate) output: OutputLog,
    pub(crate) capability_calls: usize,
}

impl RunCapture {
    pub(crate) fn new(max_output_chars: usize) -> Self {
        Self {
            terminal_answer: None,
            raw_return: None,
            script_error: None,
            output: OutputLog::new(max_output_chars),
            capability_calls: 0,
        }
    }
}

fn ok_envelope(value: Value) -> String {
    json!({ "ok": value }).to_string()
}

fn error_envelope(message: impl Into<String>) -> String {
    json!({ "error": message.into() }).to_string()
}

/// Call a host capability. Resolves to a JSON envelope, `{"ok": ..}` or
/// `{"error": ".."}`; the bootstrap shim turns the latter into a throw.
#[op2(async)]
#[string]
pub(crate) async fn op_nacre_call(
    state: Rc<RefCell<OpState>>,
    #[string] name: String,
    #[string] args: String,
) -> String {
    let capability = {
        let mut state = state.borrow_mut();

        let Ok(parsed) = name.parse::<CapabilityName>() else {
            return error_envelope(format!("unknown capability: {name}"));
        };
        let (handler, max_calls) = {
            let ctx = state.borrow::<BridgeContext>();
            (ctx.capabilities.get(parsed), ctx.max_calls)
        };
        let Some(handler) = handler else {
            return error_envelope(format!("capability not available: {name}"));
        };

        let capture = state.borrow_mut::<RunCapture>();
        if capture.capability_calls >= max_calls {
            return error_envelope(format!(
                "capability call limit exceeded (max {max_calls})"
            ));
        }
        capture.capability_calls += 1;
        handler
    };

    let args: Value = match serde_json::from_str(&args) {
        Ok(args) => args,
        Err(e) => return error_envelope(format!("invalid arguments for {name}: {e}")),
    };

    tracing::debug!(capability = %name, "capability call");
    match capability.call(args).await {
        Ok(value) => ok_envelope(value),
        Err(e) => {
            tracing::warn!(capability = %name, error = %e, "capability call failed");
            error_envelope(e.message())
        }
    }
}

/// Append one line of console output.
#[op2(fast)]
pub(crate) fn op_nacre_print(state: &mut OpState, #[string] line: &str, is_err: bool) {
    let stream = if is_err { Stream::Stderr } else { Stream::Stdout };
    state.borrow_mut::<RunCapture>().output.push(stream, line);
}

/// Latch the terminal answer. Only the first call has any effect.
#[op2(fast)]
pub(crate) fn op_nacre_final_answer(state: &mut OpState, #[string] text: &str) {
    let capture = state.borrow_mut::<RunCapture>();
    if capture.terminal_answer.is_none() {
        capture.terminal_answer = Some(text.to_string());
    } else {
        tracing::debug!("finalAnswer called again; keeping the first answer");
    }
}

/// Record the script's return value, already JSON-encoded by the shim.
#[op2(fast)]
pub(crate) fn op_nacre_set_return(state: &mut OpState, #[string] json: &str) {
    // Values that don't parse back are dropped like unserializable ones.
    if let Ok(value) = serde_json::from_str::<Value>(json) {
        state.borrow_mut::<RunCapture>().raw_return = Some(value);
    }
}

/// Record an exception that escaped the script's entry point.
#[op2(fast)]
pub(crate) fn op_nacre_fail(state: &mut OpState, #[string] message: &str) {
    let capture = state.borrow_mut::<RunCapture>();
    if capture.script_error.is_none() {
        capture.script_error = Some(message.to_string());
    }
}

deno_core::extension!(
    nacre_bridge,
    ops = [
        op_nacre_call,
        op_nacre_print,
        op_nacre_final_answer,
        op_nacre_set_return,
        op_nacre_fail,
    ],
);
