//! Isolate execution for model-written scripts.
//!
//! - [`Sandbox`]: creates a fresh V8 isolate per run, installs the capability
//!   bridge, and reports every outcome as a [`RunResult`](crate::RunResult)
//! - `watchdog`: deadline and heap-ceiling enforcement for a live isolate
//! - `allocator`: ArrayBuffer backing-store budget, outside the V8 heap

mod allocator;
mod sandbox;
mod watchdog;

pub use sandbox::Sandbox;
