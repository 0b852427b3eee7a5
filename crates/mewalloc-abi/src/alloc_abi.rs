//! Allocator ABI: `__allocator_alloc`, `__allocator_free` and companions.
//!
//! Every entry point resets this thread's error slot on success and stores
//! `HeapError::code` on failure. Out-of-memory failures also set `errno` to
//! `ENOMEM` so callers written against `malloc` conventions keep working.

use std::ffi::{c_int, c_void};
use std::ptr::{self, NonNull};

use mewalloc_core::HeapError;

use crate::heap_state::{clear_error, last_error, process_heap, record_error};

#[cfg(target_os = "linux")]
#[inline]
fn set_abi_errno(val: c_int) {
    // SAFETY: `__errno_location` returns this thread's errno slot.
    unsafe { *libc::__errno_location() = val };
}

#[cfg(not(target_os = "linux"))]
#[inline]
fn set_abi_errno(_val: c_int) {}

fn fail(err: HeapError) -> *mut c_void {
    if matches!(err, HeapError::OutOfMemory { .. }) {
        set_abi_errno(libc::ENOMEM);
    }
    record_error(err);
    ptr::null_mut()
}

fn finish(result: Result<NonNull<u8>, HeapError>) -> *mut c_void {
    match result {
        Ok(ptr) => {
            clear_error();
            ptr.as_ptr().cast()
        }
        Err(err) => fail(err),
    }
}

/// Allocates `bytes` bytes aligned to 16. Returns null on any failure,
/// including a zero-byte request.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __allocator_alloc(bytes: usize) -> *mut c_void {
    finish(process_heap().allocate(bytes))
}

/// Releases a block from `__allocator_alloc`. Null is a no-op; invalid and
/// double releases are rejected and recorded, never acted on.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __allocator_free(ptr: *mut c_void) {
    let Some(ptr) = NonNull::new(ptr.cast::<u8>()) else {
        clear_error();
        return;
    };
    match process_heap().release(ptr) {
        Ok(()) => clear_error(),
        Err(err) => record_error(err),
    }
}

/// Allocates `count * size` zeroed bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __allocator_calloc(count: usize, size: usize) -> *mut c_void {
    finish(process_heap().allocate_zeroed(count, size))
}

/// Resizes a block. `realloc(NULL, n)` allocates; `realloc(p, 0)` releases
/// `p` and returns null. On failure the original block is left untouched.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __allocator_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(old) = NonNull::new(ptr.cast::<u8>()) else {
        // SAFETY: forwarding the caller's arguments.
        return unsafe { __allocator_alloc(size) };
    };
    if size == 0 {
        // SAFETY: forwarding the caller's pointer.
        unsafe { __allocator_free(ptr) };
        return ptr::null_mut();
    }
    finish(process_heap().reallocate(old, size))
}

/// Usable payload bytes of a live block, or 0 for null and foreign pointers.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __allocator_usable_size(ptr: *mut c_void) -> usize {
    NonNull::new(ptr.cast::<u8>())
        .and_then(|ptr| process_heap().usable_size(ptr).ok())
        .unwrap_or(0)
}

/// Code of the last failing allocator call on this thread, 0 when the most
/// recent call succeeded.
#[unsafe(no_mangle)]
pub extern "C" fn __allocator_last_error() -> c_int {
    last_error()
}
