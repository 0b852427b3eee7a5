//! Arenas: regions carved into blocks.
//!
//! An arena owns one [`Region`] and is the only place the heap reads or writes
//! raw memory. All accesses are bounds-checked against the region and derive
//! their pointers from the region base.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use serde::Serialize;

use crate::block::{ALIGN, HEADER_SIZE, RawHeader};
use crate::source::Region;

/// Public description of an arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaInfo {
    /// Base address.
    pub base: usize,
    /// Usable bytes (headers plus payloads).
    pub size: usize,
}

pub(crate) struct Arena {
    region: Region,
    /// Region size rounded down to `ALIGN`.
    usable: usize,
}

impl Arena {
    pub(crate) fn new(region: Region) -> Self {
        let usable = region.size() & !(ALIGN - 1);
        Self { region, usable }
    }

    pub(crate) fn base(&self) -> usize {
        self.region.base_addr()
    }

    pub(crate) fn end(&self) -> usize {
        self.base() + self.usable
    }

    pub(crate) fn size(&self) -> usize {
        self.usable
    }

    pub(crate) fn info(&self) -> ArenaInfo {
        ArenaInfo {
            base: self.base(),
            size: self.usable,
        }
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        addr >= self.base() && addr < self.end()
    }

    /// Whether `[addr, addr + len)` lies inside the arena.
    fn spans(&self, addr: usize, len: usize) -> bool {
        addr >= self.base()
            && addr
                .checked_add(len)
                .is_some_and(|end| end <= self.end())
    }

    fn ptr_at(&self, addr: usize) -> *mut u8 {
        self.region
            .base()
            .as_ptr()
            .wrapping_add(addr - self.base())
    }

    /// Reads the header at `addr`, or `None` if it would fall outside the arena
    /// or is misaligned.
    pub(crate) fn read_header(&self, addr: usize) -> Option<RawHeader> {
        if !self.spans(addr, HEADER_SIZE) || (addr - self.base()) % ALIGN != 0 {
            return None;
        }
        // SAFETY: bounds and alignment checked above; the region is valid for
        // reads for the arena's lifetime.
        Some(unsafe { self.ptr_at(addr).cast::<RawHeader>().read() })
    }

    /// Writes a header at `addr`.
    ///
    /// Panics if `addr` is not a header slot of this arena; callers only pass
    /// addresses derived from existing block boundaries.
    pub(crate) fn write_header(&self, addr: usize, header: RawHeader) {
        assert!(
            self.spans(addr, HEADER_SIZE) && (addr - self.base()) % ALIGN == 0,
            "header slot {addr:#x} outside arena {:#x}..{:#x}",
            self.base(),
            self.end()
        );
        // SAFETY: bounds and alignment checked above; header slots are never
        // part of a caller-visible payload.
        unsafe { self.ptr_at(addr).cast::<RawHeader>().write(header) };
    }

    /// Caller-visible pointer for the block whose header sits at `header_addr`.
    pub(crate) fn payload(&self, header_addr: usize) -> NonNull<u8> {
        NonNull::new(self.ptr_at(header_addr + HEADER_SIZE)).unwrap_or(self.region.base())
    }

    /// Zeroes `len` bytes starting at `addr`.
    pub(crate) fn zero(&self, addr: usize, len: usize) {
        assert!(self.spans(addr, len), "zero range outside arena");
        // SAFETY: range checked above.
        unsafe { self.ptr_at(addr).write_bytes(0, len) };
    }

    pub(crate) fn into_region(self) -> Region {
        self.region
    }
}

/// Copies `len` payload bytes between two blocks, possibly in different arenas.
pub(crate) fn copy_between(src: &Arena, src_addr: usize, dst: &Arena, dst_addr: usize, len: usize) {
    assert!(
        src.spans(src_addr, len) && dst.spans(dst_addr, len),
        "copy range outside arena"
    );
    // SAFETY: both ranges checked above; `copy` tolerates overlap.
    unsafe { std::ptr::copy(src.ptr_at(src_addr), dst.ptr_at(dst_addr), len) };
}
