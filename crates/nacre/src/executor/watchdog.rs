//! Resource-limit enforcement for a running isolate.
//!
//! Two mechanisms stop a run that would otherwise never yield back to the
//! host:
//!
//! - [`Watchdog`]: a helper thread that calls `terminate_execution` when the
//!   run's deadline passes. This is what ends CPU-bound loops, which never
//!   reach an `.await` where a tokio timeout could fire.
//! - [`HeapLimit`]: a V8 near-heap-limit callback that terminates execution
//!   instead of letting V8 abort the whole process on OOM.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Instant;

use deno_core::{JsRuntime, v8};

/// Extra heap granted after the limit trips, so the termination exception
/// has room to propagate.
const HEAP_GRACE_BYTES: usize = 1024 * 1024;

/// Terminates an isolate once a deadline passes.
///
/// Must be disarmed (or dropped) before the isolate it watches is disposed.
#[derive(Debug)]
pub(crate) struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub(crate) fn arm(handle: v8::IsolateHandle, deadline: Instant) -> Self {
        let fired = Arc::new(AtomicBool::new(false));
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();

        let thread_fired = Arc::clone(&fired);
        let thread = std::thread::Builder::new()
            .name("nacre-watchdog".into())
            .spawn(move || {
                let wait = deadline.saturating_duration_since(Instant::now());
                if let Err(mpsc::RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(wait) {
                    thread_fired.store(true, Ordering::SeqCst);
                    handle.terminate_execution();
                }
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                // Without a watchdog only the event-loop timeout applies.
                tracing::error!(error = %e, "failed to spawn sandbox watchdog");
                None
            }
        };

        Self {
            cancel: Some(cancel_tx),
            thread,
            fired,
        }
    }

    /// Whether the deadline passed and execution was terminated.
    pub(crate) fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Stop the watchdog and wait for its thread to exit. Idempotent.
    pub(crate) fn disarm(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::warn!("sandbox watchdog thread panicked");
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// State for the near-heap-limit callback.
struct HeapLimitState {
    handle: v8::IsolateHandle,
    triggered: AtomicBool,
}

/// Heap ceiling enforcement for one isolate.
///
/// Owns the state the V8 callback points at, so it must outlive the
/// isolate: the sandbox drops it only after the runtime.
pub(crate) struct HeapLimit {
    state: Box<HeapLimitState>,
}

impl std::fmt::Debug for HeapLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapLimit")
            .field("triggered", &self.triggered())
            .finish_non_exhaustive()
    }
}

impl HeapLimit {
    pub(crate) fn install(runtime: &mut JsRuntime) -> Self {
        let state = Box::new(HeapLimitState {
            handle: runtime.v8_isolate().thread_safe_handle(),
            triggered: AtomicBool::new(false),
        });
        runtime.v8_isolate().add_near_heap_limit_callback(
            near_heap_limit_callback,
            &*state as *const HeapLimitState as *mut std::ffi::c_void,
        );
        Self { state }
    }

    /// Whether the heap ceiling was reached during the run.
    pub(crate) fn triggered(&self) -> bool {
        self.state.triggered.load(Ordering::SeqCst)
    }
}

extern "C" fn near_heap_limit_callback(
    data: *mut std::ffi::c_void,
    current_heap_limit: usize,
    _initial_heap_limit: usize,
) -> usize {
    // SAFETY: `data` points into the `Box<HeapLimitState>` owned by `HeapLimit`.
    // The sandbox drops `HeapLimit` only after the runtime, so the box outlives
    // every invocation of this callback. Only shared access is taken; the flag
    // is atomic.
    let state = unsafe { &*(data as *const HeapLimitState) };
    if !state.triggered.swap(true, Ordering::SeqCst) {
        state.handle.terminate_execution();
    }
    current_heap_limit + HEAP_GRACE_BYTES
}
