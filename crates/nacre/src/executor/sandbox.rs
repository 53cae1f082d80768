//! The isolate sandbox: one fresh V8 isolate per run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use deno_core::{JsRuntime, PollEventLoopOptions, RuntimeOptions, v8};

use super::allocator::ArrayBufferBudget;
use super::watchdog::{HeapLimit, Watchdog};
use crate::bridge::ops::{BridgeContext, RunCapture, nacre_bridge};
use crate::bridge::{self, CapabilitySet};
use crate::extract::lazy_return;
use crate::limits::ResourceLimits;
use crate::runtime::{RunResult, RunStats, SandboxError, ScriptRunner};

/// Runs model-written JavaScript in bounded, disposable V8 isolates.
///
/// Every call to [`run`](Self::run) creates a brand new isolate with the
/// configured heap ceiling, installs the capability bridge, executes the
/// snippet under the given wall-clock timeout and tears the isolate down
/// again. No state survives between runs.
///
/// V8 isolates are `!Send`, so each run happens on a dedicated thread with
/// its own single-threaded tokio runtime. The isolate is fully disposed
/// before `run` resolves.
#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    limits: ResourceLimits,
}

impl Sandbox {
    /// Create a sandbox with the given limits.
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }

    /// The limits every run is held to.
    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Run a snippet with the given capabilities.
    ///
    /// Never fails: compile errors, uncaught exceptions, timeouts and heap
    /// exhaustion are all reported through [`RunResult::error`].
    pub async fn run(
        &self,
        snippet: &str,
        capabilities: &CapabilitySet,
        timeout: Duration,
    ) -> RunResult {
        let started = Instant::now();
        tracing::info!(
            code_len = snippet.len(),
            capabilities = capabilities.len(),
            timeout_ms = timeout.as_millis() as u64,
            "sandbox run: starting"
        );

        if snippet.len() > self.limits.max_script_bytes {
            let err = SandboxError::ScriptTooLarge {
                size: snippet.len(),
                max: self.limits.max_script_bytes,
            };
            tracing::warn!(error = %err, "sandbox run: rejected");
            return RunResult::failed(&err);
        }

        let snippet = lazy_return(snippet).into_owned();
        let capabilities = capabilities.clone();
        let limits = self.limits.clone();

        // V8 isolates are !Send, so everything runs on a dedicated thread.
        let (tx, rx) = tokio::sync::oneshot::channel();
        let spawned = std::thread::Builder::new()
            .name("nacre-isolate".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let err = SandboxError::Setup(e.to_string());
                        if tx.send(RunResult::failed(&err)).is_err() {
                            tracing::warn!("sandbox result receiver dropped");
                        }
                        return;
                    }
                };
                let result = rt.block_on(run_isolated(&snippet, capabilities, &limits, timeout));
                if tx.send(result).is_err() {
                    tracing::warn!("sandbox result receiver dropped before result was sent");
                }
            });

        if let Err(e) = spawned {
            return RunResult::failed(&SandboxError::Setup(e.to_string()));
        }

        let mut result = match rx.await {
            Ok(result) => result,
            Err(_) => RunResult::failed(&SandboxError::Setup("sandbox thread panicked".into())),
        };
        result.stats.wall_time_ms = started.elapsed().as_millis() as u64;

        match &result.error {
            None => tracing::info!(
                wall_time_ms = result.stats.wall_time_ms,
                answered = result.is_answered(),
                "sandbox run: complete"
            ),
            Some(error) => tracing::warn!(
                wall_time_ms = result.stats.wall_time_ms,
                error = %error,
                "sandbox run: failed"
            ),
        }

        result
    }
}

#[async_trait]
impl ScriptRunner for Sandbox {
    async fn run(
        &self,
        snippet: &str,
        capabilities: &CapabilitySet,
        timeout: Duration,
    ) -> RunResult {
        Sandbox::run(self, snippet, capabilities, timeout).await
    }
}

/// One live isolate and everything that references it.
///
/// Field order is teardown order: `Drop` stops the watchdog and releases
/// the handles first, then the fields drop in declaration order, disposing
/// the runtime before the heap-callback state it points at.
struct Isolate {
    handles: Vec<v8::Global<v8::Value>>,
    watchdog: Watchdog,
    runtime: JsRuntime,
    heap_limit: HeapLimit,
    array_buffers: Arc<ArrayBufferBudget>,
}

impl Isolate {
    fn new(
        limits: &ResourceLimits,
        capabilities: CapabilitySet,
        deadline: Instant,
    ) -> Self {
        let max_heap = usize::try_from(limits.max_memory_bytes).unwrap_or(usize::MAX);
        // Backing stores get their own budget of the same size as the heap.
        let array_buffers = ArrayBufferBudget::new(max_heap);
        let create_params = v8::CreateParams::default()
            .heap_limits(0, max_heap)
            .array_buffer_allocator(array_buffers.allocator());

        let mut runtime = JsRuntime::new(RuntimeOptions {
            extensions: vec![nacre_bridge::init()],
            create_params: Some(create_params),
            ..Default::default()
        });

        {
            let op_state = runtime.op_state();
            let mut op_state = op_state.borrow_mut();
            op_state.put(BridgeContext {
                capabilities,
                max_calls: limits.max_capability_calls,
            });
            op_state.put(RunCapture::new(limits.max_output_chars));
        }

        let heap_limit = HeapLimit::install(&mut runtime);
        let watchdog = Watchdog::arm(runtime.v8_isolate().thread_safe_handle(), deadline);

        Self {
            handles: Vec::new(),
            watchdog,
            runtime,
            heap_limit,
            array_buffers,
        }
    }

    fn execute_script(&mut self, name: &'static str, source: String) -> Result<(), SandboxError> {
        let handle = self
            .runtime
            .execute_script(name, source)
            .map_err(|e| SandboxError::Script(e.to_string()))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Install the bridge, start the snippet and drive it to completion.
    async fn execute(
        &mut self,
        bootstrap: String,
        entry: String,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), SandboxError> {
        self.execute_script("[nacre:bootstrap]", bootstrap)?;
        self.execute_script("[nacre:run]", entry)?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(
            remaining,
            self.runtime.run_event_loop(PollEventLoopOptions::default()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SandboxError::Script(e.to_string())),
            Err(_) => Err(SandboxError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Turn the execution outcome and the captured state into a result.
    fn collect(
        &mut self,
        outcome: Result<(), SandboxError>,
        limits: &ResourceLimits,
        timeout: Duration,
    ) -> RunResult {
        // The watchdog must be stopped before its flag is trusted.
        self.watchdog.disarm();

        let capture = self
            .runtime
            .op_state()
            .borrow_mut()
            .try_take::<RunCapture>()
            .unwrap_or_else(|| RunCapture::new(limits.max_output_chars));

        let error = run_error(
            outcome,
            self.heap_limit.triggered(),
            self.array_buffers.exceeded(),
            self.watchdog.fired(),
            capture.script_error.clone(),
            limits,
            timeout,
        );

        let output_truncated = capture.output.was_truncated();
        let (stdout, stderr) = capture.output.into_streams();
        let mut result = RunResult {
            terminal_answer: capture.terminal_answer,
            raw_return_value: capture.raw_return,
            stdout,
            stderr,
            error: None,
            output_truncated,
            stats: RunStats {
                wall_time_ms: 0,
                capability_calls: capture.capability_calls,
            },
        };

        match error {
            Some(
                err @ (SandboxError::Timeout { .. }
                | SandboxError::MemoryLimit { .. }
                | SandboxError::Setup(_)),
            ) => {
                result.terminal_answer = None;
                result.raw_return_value = None;
                result.error = Some(err.to_string());
            }
            // An answer latched before a later exception still stands.
            Some(err) if result.terminal_answer.is_some() => {
                tracing::debug!(error = %err, "script failed after finalAnswer; keeping answer");
            }
            Some(err) => {
                result.raw_return_value = None;
                result.error = Some(err.to_string());
            }
            None => {}
        }

        result
    }
}

/// Pick the error a run reports.
///
/// Resource limits come first: a terminated isolate reports a generic
/// "execution terminated" error that would hide the real cause. The
/// watchdog only counts when execution did not complete; it can fire in the
/// window between the event loop finishing and being disarmed. V8 retries a
/// refused backing store after a GC, so a refusal only counts when the run
/// failed.
fn run_error(
    outcome: Result<(), SandboxError>,
    heap_exceeded: bool,
    buffer_refused: bool,
    watchdog_fired: bool,
    script_error: Option<String>,
    limits: &ResourceLimits,
    timeout: Duration,
) -> Option<SandboxError> {
    let failed = outcome.is_err() || script_error.is_some();
    if heap_exceeded || (buffer_refused && failed) {
        return Some(SandboxError::MemoryLimit {
            limit_mb: limits.max_memory_bytes / (1024 * 1024),
        });
    }
    match outcome {
        Err(_) if watchdog_fired => Some(SandboxError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }),
        Err(e) => Some(e),
        Ok(()) => script_error.map(SandboxError::Script),
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        self.watchdog.disarm();
        let released = self.handles.len();
        self.handles.clear();
        tracing::trace!(released, "isolate handles released; disposing isolate");
    }
}

/// Run one snippet start to finish on the current thread.
///
/// Must be called from a dedicated thread, not from the caller's tokio
/// runtime.
async fn run_isolated(
    snippet: &str,
    capabilities: CapabilitySet,
    limits: &ResourceLimits,
    timeout: Duration,
) -> RunResult {
    let deadline = Instant::now() + timeout;
    let bootstrap = bridge::bootstrap_source(&capabilities);
    let entry = bridge::entry_source(snippet);

    let mut isolate = Isolate::new(limits, capabilities, deadline);
    let outcome = isolate.execute(bootstrap, entry, deadline, timeout).await;
    let result = isolate.collect(outcome, limits, timeout);
    drop(isolate);

    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(300);

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_bytes: 16 * 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_completed_run_ignores_late_watchdog() {
        let error = run_error(Ok(()), false, false, true, None, &limits(), TIMEOUT);
        assert!(error.is_none());
    }

    #[test]
    fn test_completed_run_keeps_script_error() {
        let error = run_error(
            Ok(()),
            false,
            false,
            true,
            Some("boom".into()),
            &limits(),
            TIMEOUT,
        );
        assert_eq!(error.map(|e| e.to_string()).as_deref(), Some("boom"));
    }

    #[test]
    fn test_terminated_run_reports_timeout() {
        let outcome = Err(SandboxError::Script("execution terminated".into()));
        let error = run_error(outcome, false, false, true, None, &limits(), TIMEOUT);
        assert_eq!(
            error.map(|e| e.to_string()).as_deref(),
            Some("execution timed out after 300ms")
        );
    }

    #[test]
    fn test_memory_limit_takes_priority() {
        let outcome = Err(SandboxError::Script("execution terminated".into()));
        let error = run_error(outcome, true, false, true, None, &limits(), TIMEOUT);
        assert_eq!(
            error.map(|e| e.to_string()).as_deref(),
            Some("memory limit exceeded (16 MB)")
        );
    }

    #[test]
    fn test_refused_buffer_fails_the_run() {
        let error = run_error(
            Ok(()),
            false,
            true,
            false,
            Some("RangeError: Array buffer allocation failed".into()),
            &limits(),
            TIMEOUT,
        );
        assert_eq!(
            error.map(|e| e.to_string()).as_deref(),
            Some("memory limit exceeded (16 MB)")
        );
    }

    #[test]
    fn test_recovered_buffer_refusal_is_ignored() {
        let error = run_error(Ok(()), false, true, false, None, &limits(), TIMEOUT);
        assert!(error.is_none());
    }

    #[test]
    fn test_plain_script_error_passes_through() {
        let outcome = Err(SandboxError::Script("SyntaxError: Unexpected token".into()));
        let error = run_error(outcome, false, false, false, None, &limits(), TIMEOUT);
        assert!(error.unwrap().to_string().starts_with("SyntaxError"));
    }
}
