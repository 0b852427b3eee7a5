//! Core heap state.
//!
//! The heap carves arenas obtained from a [`MemorySource`] into blocks and
//! serves requests best-fit from the free list. Released blocks are merged
//! with free neighbors immediately, so no two free blocks are ever adjacent.
//! Neighbors are found by address arithmetic: the following block starts
//! where the current one ends, and the preceding free block is the one in the
//! address index whose end equals the current header.
//!
//! All state sits behind one `parking_lot::Mutex`; every public operation
//! holds it for its full duration.

use std::collections::BTreeMap;
use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::arena::{self, Arena, ArenaInfo};
use crate::block::{self, ALIGN, BlockState, HEADER_SIZE, RawHeader};
use crate::config::{HeapConfig, global_config};
use crate::error::HeapError;
use crate::free_list::FreeList;
use crate::log::{HeapLogLevel, HeapLogRecord, LifecycleLog, LogEvent, LogSnapshot};
use crate::source::{MemorySource, SystemSource};
use crate::stats::{BlockInfo, HeapCounters, HeapStats};

/// A live block located from a caller pointer.
#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    arena: usize,
    header: usize,
    size: usize,
}

struct HeapState<S: MemorySource> {
    source: S,
    config: HeapConfig,
    /// Arenas keyed by base address.
    arenas: BTreeMap<usize, Arena>,
    free: FreeList,
    live_blocks: usize,
    /// Payload bytes of in-use blocks.
    live_bytes: usize,
    counters: HeapCounters,
    log: LifecycleLog,
}

fn arena_containing(arenas: &BTreeMap<usize, Arena>, addr: usize) -> Option<&Arena> {
    arenas
        .range(..=addr)
        .next_back()
        .map(|(_, arena)| arena)
        .filter(|arena| arena.contains(addr))
}

/// Marks the block free and merges it with free neighbors in the same arena.
///
/// Returns the header address and payload size of the resulting free block.
fn coalesce(
    arena: &Arena,
    free: &mut FreeList,
    counters: &mut HeapCounters,
    header: usize,
    size: usize,
) -> (usize, usize) {
    arena.write_header(header, RawHeader::encode(header, size, BlockState::Free));
    let mut start = header;
    let mut total = size;

    let next = block::block_end(header, size);
    if next < arena.end() {
        if let Some(next_size) = free.remove(next) {
            total += HEADER_SIZE + next_size;
            counters.coalesces += 1;
        }
    }
    if let Some((prev, prev_size)) = free.preceding(header) {
        if prev >= arena.base() && block::block_end(prev, prev_size) == header {
            free.remove(prev);
            start = prev;
            total += prev_size + HEADER_SIZE;
            counters.coalesces += 1;
        }
    }

    if start != header || total != size {
        arena.write_header(start, RawHeader::encode(start, total, BlockState::Free));
    }
    free.insert(start, total);
    (start, total)
}

impl<S: MemorySource> HeapState<S> {
    fn new(source: S, config: HeapConfig) -> Self {
        Self {
            source,
            config,
            arenas: BTreeMap::new(),
            free: FreeList::new(),
            live_blocks: 0,
            live_bytes: 0,
            counters: HeapCounters::default(),
            log: LifecycleLog::new(config.log_level, config.log_capacity),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        level: HeapLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<usize>,
        size: Option<usize>,
        outcome: &'static str,
        details: impl fmt::Display,
    ) {
        if !self.log.enabled(level) {
            return;
        }
        let snapshot = LogSnapshot {
            live_blocks: self.live_blocks,
            free_blocks: self.free.len(),
            arena_count: self.arenas.len(),
        };
        self.log.push(
            LogEvent {
                level,
                symbol,
                event,
                ptr,
                size,
                outcome,
                details: details.to_string(),
            },
            snapshot,
        );
    }

    fn reject(
        &mut self,
        symbol: &'static str,
        event: &'static str,
        err: HeapError,
        ptr: Option<usize>,
        size: Option<usize>,
        details: impl fmt::Display,
    ) -> HeapError {
        self.record(HeapLogLevel::Warn, symbol, event, ptr, size, err.label(), details);
        err
    }

    /// Allocates a block of at least `size` bytes; returns the payload pointer
    /// and the block's payload capacity.
    fn allocate(
        &mut self,
        symbol: &'static str,
        size: usize,
    ) -> Result<(NonNull<u8>, usize), HeapError> {
        if size == 0 {
            let err = HeapError::InvalidArgument { size };
            return Err(self.reject(symbol, "alloc_rejected", err, None, Some(size), "zero_size"));
        }
        let Some(needed) = block::round_up(size) else {
            let err = HeapError::OutOfMemory { requested: size };
            return Err(self.reject(symbol, "alloc_failed", err, None, Some(size), "size_overflow"));
        };

        let (addr, available, path) = match self.free.best_fit(needed) {
            Some((addr, available)) => (addr, available, "path=free_list"),
            None => {
                let (addr, available) = self.grow(symbol, needed, size)?;
                (addr, available, "path=new_arena")
            }
        };
        let (ptr, capacity) = match self.carve(addr, available, needed) {
            Ok(carved) => carved,
            Err(err) => {
                return Err(self.reject(symbol, "corruption_detected", err, Some(addr), Some(size), path));
            }
        };
        self.counters.allocations += 1;
        self.record(
            HeapLogLevel::Trace,
            symbol,
            "alloc",
            Some(ptr.as_ptr() as usize),
            Some(size),
            "success",
            path,
        );
        Ok((ptr, capacity))
    }

    /// Requests a new arena large enough for `needed` payload bytes and formats
    /// it as one free block.
    fn grow(
        &mut self,
        symbol: &'static str,
        needed: usize,
        requested: usize,
    ) -> Result<(usize, usize), HeapError> {
        let oom = HeapError::OutOfMemory { requested };
        let Some(request) = needed
            .checked_add(HEADER_SIZE)
            .map(|span| span.max(self.config.min_arena_size))
            .and_then(|bytes| bytes.checked_next_multiple_of(ALIGN))
        else {
            return Err(self.reject(symbol, "alloc_failed", oom, None, Some(requested), "arena_size_overflow"));
        };

        self.counters.arena_requests += 1;
        let Some(region) = self.source.request_memory(request) else {
            self.counters.arena_failures += 1;
            return Err(self.reject(
                symbol,
                "arena_request_failed",
                oom,
                None,
                Some(request),
                format_args!("requested={requested} needed={needed}"),
            ));
        };
        if region.base_addr() % ALIGN != 0 || region.size() < request {
            self.source.return_memory(region);
            self.counters.arena_failures += 1;
            return Err(self.reject(
                symbol,
                "arena_request_failed",
                oom,
                None,
                Some(request),
                "region_unusable",
            ));
        }

        let arena = Arena::new(region);
        let base = arena.base();
        let size = arena.size() - HEADER_SIZE;
        arena.write_header(base, RawHeader::encode(base, size, BlockState::Free));
        self.free.insert(base, size);
        self.arenas.insert(base, arena);
        let arena_count = self.arenas.len();
        self.record(
            HeapLogLevel::Info,
            symbol,
            "arena_request",
            Some(base),
            Some(request),
            "success",
            format_args!("arena_count={arena_count}"),
        );
        Ok((base, size))
    }

    /// Hands out the free block at `addr`, splitting off the excess when it is
    /// larger than one header. Under strict checks the free header must still
    /// decode to the indexed size.
    fn carve(
        &mut self,
        addr: usize,
        available: usize,
        needed: usize,
    ) -> Result<(NonNull<u8>, usize), HeapError> {
        let verify = self.config.checks.verifies_free_blocks();
        let HeapState {
            arenas,
            free,
            counters,
            ..
        } = self;
        let arena = arena_containing(arenas, addr).ok_or(HeapError::CorruptHeap {
            addr,
            reason: "free block outside every arena",
        })?;
        if verify {
            let header = arena.read_header(addr).and_then(|raw| raw.decode(addr));
            if header != Some((available, BlockState::Free)) {
                return Err(HeapError::CorruptHeap {
                    addr,
                    reason: "free block header overwritten",
                });
            }
        }
        free.remove(addr);

        let size = if block::should_split(available, needed) {
            let rest = block::block_end(addr, needed);
            let rest_size = available - needed - HEADER_SIZE;
            arena.write_header(rest, RawHeader::encode(rest, rest_size, BlockState::Free));
            free.insert(rest, rest_size);
            counters.splits += 1;
            needed
        } else {
            available
        };
        arena.write_header(addr, RawHeader::encode(addr, size, BlockState::InUse));
        let ptr = arena.payload(addr);

        self.live_blocks += 1;
        self.live_bytes += size;
        Ok((ptr, size))
    }

    /// Locates the live block behind a caller pointer.
    fn resolve(&self, ptr: NonNull<u8>) -> Result<LiveBlock, HeapError> {
        let addr = ptr.as_ptr() as usize;
        let invalid = HeapError::InvalidPointer { ptr: addr };
        let arena = arena_containing(&self.arenas, addr).ok_or(invalid)?;
        if addr < arena.base() + HEADER_SIZE || (addr - arena.base()) % ALIGN != 0 {
            return Err(invalid);
        }
        let header = addr - HEADER_SIZE;
        if self.free.contains(header) {
            return Err(HeapError::DoubleFree { ptr: addr });
        }

        let raw = arena.read_header(header).ok_or(invalid)?;
        let size = match raw.decode(header) {
            Some((size, BlockState::InUse)) => size,
            Some((_, BlockState::Free)) => return Err(HeapError::DoubleFree { ptr: addr }),
            None => return Err(invalid),
        };

        let fits = size
            .checked_add(HEADER_SIZE)
            .and_then(|span| header.checked_add(span))
            .is_some_and(|end| end <= arena.end());
        if size == 0 || size % ALIGN != 0 || !fits {
            return Err(invalid);
        }
        Ok(LiveBlock {
            arena: arena.base(),
            header,
            size,
        })
    }

    fn resolve_logged(
        &mut self,
        symbol: &'static str,
        ptr: NonNull<u8>,
    ) -> Result<LiveBlock, HeapError> {
        self.resolve(ptr).map_err(|err| {
            self.counters.rejected_releases += 1;
            let event = match err {
                HeapError::DoubleFree { .. } => "double_free_detected",
                _ => "invalid_pointer",
            };
            self.reject(symbol, event, err, Some(ptr.as_ptr() as usize), None, "")
        })
    }

    fn release(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let live = self.resolve_logged("release", ptr)?;
        self.free_live(live);
        self.counters.releases += 1;
        self.record(
            HeapLogLevel::Trace,
            "release",
            "free",
            Some(ptr.as_ptr() as usize),
            Some(live.size),
            "success",
            "",
        );
        Ok(())
    }

    fn free_live(&mut self, live: LiveBlock) {
        let HeapState {
            arenas,
            free,
            counters,
            ..
        } = self;
        let arena = &arenas[&live.arena];
        coalesce(arena, free, counters, live.header, live.size);
        self.live_blocks -= 1;
        self.live_bytes -= live.size;
    }

    fn reallocate(&mut self, ptr: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>, HeapError> {
        const SYMBOL: &str = "reallocate";
        let addr = ptr.as_ptr() as usize;
        if new_size == 0 {
            let err = HeapError::InvalidArgument { size: 0 };
            return Err(self.reject(SYMBOL, "realloc_rejected", err, Some(addr), Some(0), "zero_size"));
        }
        let live = self.resolve_logged(SYMBOL, ptr)?;
        let Some(needed) = block::round_up(new_size) else {
            let err = HeapError::OutOfMemory {
                requested: new_size,
            };
            return Err(self.reject(SYMBOL, "realloc_failed", err, Some(addr), Some(new_size), "size_overflow"));
        };
        if let Some(size) = self.resize_in_place(live, needed) {
            self.counters.reallocations += 1;
            self.record(
                HeapLogLevel::Trace,
                SYMBOL,
                "realloc_in_place",
                Some(addr),
                Some(new_size),
                "success",
                format_args!("old_size={} new_capacity={size}", live.size),
            );
            return Ok(ptr);
        }

        let (new_ptr, _) = self.allocate(SYMBOL, new_size)?;
        let new_header = new_ptr.as_ptr() as usize - HEADER_SIZE;
        if let (Some(src), Some(dst)) = (
            self.arenas.get(&live.arena),
            arena_containing(&self.arenas, new_header),
        ) {
            arena::copy_between(
                src,
                live.header + HEADER_SIZE,
                dst,
                new_header + HEADER_SIZE,
                live.size,
            );
        }
        self.free_live(live);
        self.counters.reallocations += 1;
        self.record(
            HeapLogLevel::Trace,
            SYMBOL,
            "realloc_move",
            Some(new_ptr.as_ptr() as usize),
            Some(new_size),
            "success",
            format_args!("old_ptr={addr:#x} old_size={}", live.size),
        );
        Ok(new_ptr)
    }

    /// Shrinks the block, or grows it into a following free block. Returns the
    /// new payload capacity, or `None` if the block has to move.
    fn resize_in_place(&mut self, live: LiveBlock, needed: usize) -> Option<usize> {
        let HeapState {
            arenas,
            free,
            counters,
            ..
        } = self;
        let arena = arenas.get(&live.arena)?;
        let header = live.header;

        let size = if needed <= live.size {
            if block::should_split(live.size, needed) {
                arena.write_header(header, RawHeader::encode(header, needed, BlockState::InUse));
                let tail = block::block_end(header, needed);
                coalesce(arena, free, counters, tail, live.size - needed - HEADER_SIZE);
                counters.splits += 1;
                needed
            } else {
                live.size
            }
        } else {
            let next = block::block_end(header, live.size);
            if next >= arena.end() {
                return None;
            }
            let next_size = free.size_of(next)?;
            let combined = live.size + HEADER_SIZE + next_size;
            if combined < needed {
                return None;
            }
            free.remove(next);
            counters.coalesces += 1;
            let size = if block::should_split(combined, needed) {
                let tail = block::block_end(header, needed);
                let tail_size = combined - needed - HEADER_SIZE;
                arena.write_header(tail, RawHeader::encode(tail, tail_size, BlockState::Free));
                free.insert(tail, tail_size);
                counters.splits += 1;
                needed
            } else {
                combined
            };
            arena.write_header(header, RawHeader::encode(header, size, BlockState::InUse));
            size
        };

        self.live_bytes = self.live_bytes - live.size + size;
        Some(size)
    }

    fn allocate_zeroed(&mut self, count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        const SYMBOL: &str = "allocate_zeroed";
        let Some(total) = count.checked_mul(size) else {
            let err = HeapError::OutOfMemory {
                requested: usize::MAX,
            };
            return Err(self.reject(
                SYMBOL,
                "calloc_overflow",
                err,
                None,
                None,
                format_args!("count={count} size={size}"),
            ));
        };
        let (ptr, capacity) = self.allocate(SYMBOL, total)?;
        let addr = ptr.as_ptr() as usize;
        if let Some(arena) = arena_containing(&self.arenas, addr) {
            arena.zero(addr, capacity);
        }
        Ok(ptr)
    }

    /// Returns every arena that is one whole free block to the memory source.
    fn trim(&mut self) -> usize {
        let empty: Vec<usize> = self
            .arenas
            .values()
            .filter(|arena| self.free.size_of(arena.base()) == Some(arena.size() - HEADER_SIZE))
            .map(Arena::base)
            .collect();

        let mut returned = 0;
        for base in &empty {
            self.free.remove(*base);
            if let Some(arena) = self.arenas.remove(base) {
                let region = arena.into_region();
                returned += region.size();
                self.source.return_memory(region);
                self.counters.arenas_returned += 1;
            }
        }
        self.record(
            HeapLogLevel::Info,
            "trim",
            "arenas_returned",
            None,
            Some(returned),
            "success",
            format_args!("arenas={}", empty.len()),
        );
        returned
    }

    fn stats(&self) -> HeapStats {
        HeapStats {
            arena_count: self.arenas.len(),
            arena_bytes: self.arenas.values().map(Arena::size).sum(),
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            free_blocks: self.free.len(),
            free_bytes: self.free.total_bytes(),
            largest_free_block: self.free.largest().unwrap_or(0),
            counters: self.counters,
        }
    }

    /// Walks every arena header by header.
    fn walk(&self) -> Result<Vec<BlockInfo>, HeapError> {
        let mut blocks = Vec::new();
        for arena in self.arenas.values() {
            let mut addr = arena.base();
            while addr < arena.end() {
                let corrupt = |reason| HeapError::CorruptHeap { addr, reason };
                let raw = arena
                    .read_header(addr)
                    .ok_or(corrupt("header slot out of bounds"))?;
                let (size, state) = raw.decode(addr).ok_or(corrupt("guard tag mismatch"))?;
                if size == 0 || size % ALIGN != 0 {
                    return Err(corrupt("misaligned block size"));
                }
                let end = block::block_end(addr, size);
                if end > arena.end() {
                    return Err(corrupt("block overruns arena"));
                }
                blocks.push(BlockInfo {
                    arena: arena.base(),
                    addr,
                    size,
                    state,
                });
                addr = end;
            }
        }
        Ok(blocks)
    }

    fn check_integrity(&self) -> Result<(), HeapError> {
        let blocks = self.walk()?;

        let mut live_blocks = 0;
        let mut live_bytes = 0;
        for (i, info) in blocks.iter().enumerate() {
            let corrupt = |reason| HeapError::CorruptHeap {
                addr: info.addr,
                reason,
            };
            match info.state {
                BlockState::Free => {
                    if self.free.size_of(info.addr) != Some(info.size) {
                        return Err(corrupt("free block missing from free list"));
                    }
                    let prev = i.checked_sub(1).and_then(|p| blocks.get(p));
                    if prev.is_some_and(|p| p.arena == info.arena && p.is_free()) {
                        return Err(corrupt("adjacent free blocks"));
                    }
                }
                BlockState::InUse => {
                    if self.free.contains(info.addr) {
                        return Err(corrupt("live block in free list"));
                    }
                    live_blocks += 1;
                    live_bytes += info.size;
                }
            }
        }

        for arena in self.arenas.values() {
            let listed = self.free.in_range(arena.base(), arena.end()).count();
            let walked = blocks
                .iter()
                .filter(|b| b.arena == arena.base() && b.is_free())
                .count();
            if listed != walked {
                return Err(HeapError::CorruptHeap {
                    addr: arena.base(),
                    reason: "free list holds entries that are not block headers",
                });
            }
        }
        if let Some((addr, _)) = self
            .free
            .iter()
            .find(|&(addr, _)| arena_containing(&self.arenas, addr).is_none())
        {
            return Err(HeapError::CorruptHeap {
                addr,
                reason: "free list entry outside every arena",
            });
        }
        if live_blocks != self.live_blocks || live_bytes != self.live_bytes {
            return Err(HeapError::CorruptHeap {
                addr: 0,
                reason: "live accounting drift",
            });
        }
        Ok(())
    }
}

impl<S: MemorySource> Drop for HeapState<S> {
    fn drop(&mut self) {
        for (_, arena) in std::mem::take(&mut self.arenas) {
            self.source.return_memory(arena.into_region());
        }
    }
}

/// Thread-safe best-fit heap allocator.
///
/// Pointers returned by a heap stay valid until released or until the heap is
/// dropped; dropping the heap returns every arena to its memory source.
pub struct Heap<S: MemorySource = SystemSource> {
    state: Mutex<HeapState<S>>,
}

impl Heap<SystemSource> {
    /// Heap over the host allocator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(SystemSource::new())
    }

    /// Heap over the host allocator configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(SystemSource::new(), global_config())
    }
}

impl Default for Heap<SystemSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: MemorySource> Heap<S> {
    #[must_use]
    pub fn with_source(source: S) -> Self {
        Self::with_config(source, HeapConfig::default())
    }

    #[must_use]
    pub fn with_config(source: S, config: HeapConfig) -> Self {
        Self {
            state: Mutex::new(HeapState::new(source, config)),
        }
    }

    #[must_use]
    pub fn config(&self) -> HeapConfig {
        self.state.lock().config
    }

    /// Allocates at least `size` bytes aligned to [`ALIGN`].
    ///
    /// Zero-byte requests fail with [`HeapError::InvalidArgument`]. A failed
    /// call leaves the heap unchanged.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.state
            .lock()
            .allocate("allocate", size)
            .map(|(ptr, _)| ptr)
    }

    /// Allocates `count * size` zeroed bytes.
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Result<NonNull<u8>, HeapError> {
        self.state.lock().allocate_zeroed(count, size)
    }

    /// Resizes a live block, moving it only when it cannot grow in place.
    ///
    /// On failure the original block is untouched and still live.
    pub fn reallocate(&self, ptr: NonNull<u8>, new_size: usize) -> Result<NonNull<u8>, HeapError> {
        self.state.lock().reallocate(ptr, new_size)
    }

    /// Releases a block obtained from this heap.
    pub fn release(&self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        self.state.lock().release(ptr)
    }

    /// Payload capacity of a live block.
    pub fn usable_size(&self, ptr: NonNull<u8>) -> Result<usize, HeapError> {
        self.state.lock().resolve(ptr).map(|live| live.size)
    }

    /// Whether `ptr` points into one of this heap's arenas.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        arena_containing(&self.state.lock().arenas, ptr as usize).is_some()
    }

    /// Returns fully free arenas to the memory source; yields the bytes returned.
    pub fn trim(&self) -> usize {
        self.state.lock().trim()
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        self.state.lock().stats()
    }

    /// Address-ordered list of every block in every arena.
    pub fn blocks(&self) -> Result<Vec<BlockInfo>, HeapError> {
        self.state.lock().walk()
    }

    #[must_use]
    pub fn arenas(&self) -> Vec<ArenaInfo> {
        self.state.lock().arenas.values().map(Arena::info).collect()
    }

    /// Verifies headers, tiling, free-list membership and coalescing.
    pub fn check_integrity(&self) -> Result<(), HeapError> {
        self.state.lock().check_integrity()
    }

    /// Runs `f` against the memory source.
    pub fn inspect_source<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.state.lock().source)
    }

    /// Returns a copy of the retained lifecycle records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        self.state.lock().log.records()
    }

    /// Drains the retained lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<HeapLogRecord> {
        self.state.lock().log.drain()
    }
}
