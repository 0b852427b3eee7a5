// Exports take raw pointers from C callers and validate them against the heap,
// so per-function safety docs would only restate the checks.
#![allow(clippy::missing_safety_doc)]
//! # mewalloc-abi
//!
//! `extern "C"` allocator entry points for code generated by the mew compiler.
//!
//! ```text
//! C caller -> __allocator_* (this crate) -> process heap (mewalloc-core) -> return
//! ```
//!
//! Failures never unwind across the boundary: allocation entry points return
//! null and every failure is recorded in a thread-local error slot readable via
//! `__allocator_last_error`.

pub mod alloc_abi;
mod heap_state;

pub use heap_state::process_heap;
