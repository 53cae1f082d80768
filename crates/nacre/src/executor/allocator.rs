//! Bounded ArrayBuffer allocator.
//!
//! ArrayBuffer and typed-array backing stores live outside the V8 heap, so
//! `heap_limits` and the near-heap-limit callback never see them. Each
//! isolate gets its own allocator that counts live backing-store bytes and
//! refuses any allocation that would pass the ceiling. A refused allocation
//! surfaces inside the script as a `RangeError`.

use std::alloc::Layout;
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use deno_core::v8;

/// Alignment for backing stores; matches what V8's default allocator gives.
const ALIGN: usize = 16;

/// Byte budget shared between an isolate's allocator and the sandbox.
#[derive(Debug)]
pub(crate) struct ArrayBufferBudget {
    limit: usize,
    used: AtomicUsize,
    exceeded: AtomicBool,
}

impl ArrayBufferBudget {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit,
            used: AtomicUsize::new(0),
            exceeded: AtomicBool::new(false),
        })
    }

    /// Whether any allocation was refused during the run, even one V8 later
    /// retried successfully.
    pub(crate) fn exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    /// Live backing-store bytes.
    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    fn reserve(&self, len: usize) -> bool {
        let reserved = self
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                used.checked_add(len).filter(|&total| total <= self.limit)
            })
            .is_ok();
        if !reserved {
            self.exceeded.store(true, Ordering::SeqCst);
        }
        reserved
    }

    fn release(&self, len: usize) {
        self.used.fetch_sub(len, Ordering::SeqCst);
    }

    /// Build a V8 allocator drawing from this budget.
    pub(crate) fn allocator(self: &Arc<Self>) -> v8::UniqueRef<v8::Allocator> {
        let handle = Arc::into_raw(Arc::clone(self));
        // SAFETY: `handle` is a leaked strong count, reclaimed exactly once in
        // `drop_budget` when V8 releases the allocator. The vtable is 'static.
        unsafe { v8::new_rust_allocator(handle, &VTABLE) }
    }
}

static VTABLE: v8::RustAllocatorVtable<ArrayBufferBudget> = v8::RustAllocatorVtable {
    allocate,
    allocate_uninitialized,
    free,
    drop: drop_budget,
};

/// Zero-length buffers still get a real one-byte block so `free` is uniform.
fn layout(len: usize) -> Option<Layout> {
    Layout::from_size_align(len.max(1), ALIGN).ok()
}

unsafe extern "C" fn allocate(budget: &ArrayBufferBudget, len: usize) -> *mut c_void {
    let Some(layout) = layout(len) else {
        return ptr::null_mut();
    };
    if !budget.reserve(len) {
        return ptr::null_mut();
    }
    // SAFETY: `layout` has a non-zero size.
    let data = unsafe { std::alloc::alloc_zeroed(layout) };
    if data.is_null() {
        budget.release(len);
    }
    data.cast()
}

unsafe extern "C" fn allocate_uninitialized(
    budget: &ArrayBufferBudget,
    len: usize,
) -> *mut c_void {
    let Some(layout) = layout(len) else {
        return ptr::null_mut();
    };
    if !budget.reserve(len) {
        return ptr::null_mut();
    }
    // SAFETY: `layout` has a non-zero size.
    let data = unsafe { std::alloc::alloc(layout) };
    if data.is_null() {
        budget.release(len);
    }
    data.cast()
}

unsafe extern "C" fn free(budget: &ArrayBufferBudget, data: *mut c_void, len: usize) {
    if data.is_null() {
        return;
    }
    if let Some(layout) = layout(len) {
        // SAFETY: V8 hands back a block this allocator returned for `len`.
        unsafe { std::alloc::dealloc(data.cast(), layout) };
        budget.release(len);
    }
}

unsafe extern "C" fn reallocate(
    budget: &ArrayBufferBudget,
    data: *mut c_void,
    old_len: usize,
    new_len: usize,
) -> *mut c_void {
    // SAFETY: forwarded from V8 under the same contract.
    let new_data = unsafe { allocate_uninitialized(budget, new_len) };
    if new_data.is_null() {
        return ptr::null_mut();
    }
    if !data.is_null() {
        // SAFETY: both blocks are live and at least `min(old, new)` bytes long.
        unsafe {
            ptr::copy_nonoverlapping(
                data.cast::<u8>(),
                new_data.cast::<u8>(),
                old_len.min(new_len),
            );
            free(budget, data, old_len);
        }
    }
    new_data
}

unsafe extern "C" fn drop_budget(handle: *const ArrayBufferBudget) {
    // SAFETY: `handle` came from `Arc::into_raw` in `allocator`.
    drop(unsafe { Arc::from_raw(handle) });
}
