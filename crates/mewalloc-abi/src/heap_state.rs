//! Process-wide heap behind the C entry points.
//!
//! The heap is built on first use from the environment configuration and is
//! never torn down; blocks handed to C callers stay valid for the life of the
//! process.

use std::cell::Cell;
use std::sync::OnceLock;

use mewalloc_core::{Heap, HeapError};

static PROCESS_HEAP: OnceLock<Heap> = OnceLock::new();

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// The heap shared by every `__allocator_*` entry point.
pub fn process_heap() -> &'static Heap {
    PROCESS_HEAP.get_or_init(Heap::from_env)
}

#[inline]
pub(crate) fn record_error(err: HeapError) {
    LAST_ERROR.with(|slot| slot.set(err.code()));
}

#[inline]
pub(crate) fn clear_error() {
    LAST_ERROR.with(|slot| slot.set(0));
}

#[inline]
pub(crate) fn last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}
