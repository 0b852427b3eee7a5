//! Operating-environment memory source.
//!
//! The heap obtains whole arenas through [`MemorySource`] and never touches
//! the host allocator directly. [`SystemSource`] forwards to `std::alloc`.

#![allow(unsafe_code)]

use std::alloc::Layout;
use std::ptr::NonNull;

use crate::block::ALIGN;

/// A contiguous region handed out by a [`MemorySource`].
#[derive(Debug, PartialEq, Eq)]
pub struct Region {
    base: NonNull<u8>,
    size: usize,
}

// SAFETY: a region is exclusively owned by whoever holds it; the raw base
// pointer carries no thread affinity.
unsafe impl Send for Region {}

impl Region {
    /// Wraps a raw region.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `size` bytes and must not be
    /// accessed by anyone else until the region is returned to its source.
    #[must_use]
    pub unsafe fn from_raw_parts(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    #[must_use]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Supplier of arenas.
///
/// # Safety
///
/// Regions returned by `request_memory` must be aligned to [`ALIGN`], span at
/// least the requested byte count, be initialized (zero-filled is fine), stay
/// valid until passed back to `return_memory`, and never overlap another
/// outstanding region.
pub unsafe trait MemorySource: Send {
    /// Obtains a region of at least `byte_count` bytes, or `None` when exhausted.
    fn request_memory(&mut self, byte_count: usize) -> Option<Region>;

    /// Gives a region previously obtained from `request_memory` back.
    fn return_memory(&mut self, region: Region);
}

/// Memory source backed by the host allocator.
///
/// An optional byte budget makes exhaustion reproducible.
#[derive(Debug, Default)]
pub struct SystemSource {
    limit: Option<usize>,
    outstanding: usize,
}

impl SystemSource {
    /// Unlimited source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that refuses requests once `limit` bytes are outstanding.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            outstanding: 0,
        }
    }

    /// Bytes currently handed out and not yet returned.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}

// SAFETY: regions come straight from `std::alloc::alloc_zeroed` with an `ALIGN`
// layout of exactly the recorded size.
unsafe impl MemorySource for SystemSource {
    fn request_memory(&mut self, byte_count: usize) -> Option<Region> {
        if byte_count == 0 {
            return None;
        }
        let next = self.outstanding.checked_add(byte_count)?;
        if self.limit.is_some_and(|limit| next > limit) {
            return None;
        }
        let layout = Layout::from_size_align(byte_count, ALIGN).ok()?;
        // SAFETY: layout has nonzero size.
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw)?;
        self.outstanding = next;
        Some(Region {
            base,
            size: byte_count,
        })
    }

    fn return_memory(&mut self, region: Region) {
        let Ok(layout) = Layout::from_size_align(region.size, ALIGN) else {
            return;
        };
        // SAFETY: the region was allocated above with this exact layout.
        unsafe { std::alloc::dealloc(region.base.as_ptr(), layout) };
        self.outstanding = self.outstanding.saturating_sub(region.size);
    }
}
