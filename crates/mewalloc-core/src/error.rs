//! Heap error kinds.

use thiserror::Error;

/// Errors reported by [`Heap`](crate::Heap) operations.
///
/// Every error is returned to the caller of the failing operation; the heap
/// never retries internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Zero-byte request (or zero-byte resize).
    #[error("invalid allocation size {size}")]
    InvalidArgument { size: usize },
    /// The memory source could not supply an arena, or the size overflowed.
    #[error("out of memory: {requested} bytes requested")]
    OutOfMemory { requested: usize },
    /// Release of a block that is already free.
    #[error("double free of {ptr:#x}")]
    DoubleFree { ptr: usize },
    /// Pointer that was never handed out by this heap.
    #[error("pointer {ptr:#x} is not owned by this heap")]
    InvalidPointer { ptr: usize },
    /// Integrity walk found inconsistent bookkeeping.
    #[error("heap corruption at {addr:#x}: {reason}")]
    CorruptHeap { addr: usize, reason: &'static str },
}

impl HeapError {
    /// Stable numeric code, used across the C boundary.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidArgument { .. } => 1,
            Self::OutOfMemory { .. } => 2,
            Self::DoubleFree { .. } => 3,
            Self::InvalidPointer { .. } => 4,
            Self::CorruptHeap { .. } => 5,
        }
    }

    /// Short machine-readable label, used as the log outcome.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::OutOfMemory { .. } => "oom",
            Self::DoubleFree { .. } => "double_free",
            Self::InvalidPointer { .. } => "invalid_pointer",
            Self::CorruptHeap { .. } => "corrupt_heap",
        }
    }
}
