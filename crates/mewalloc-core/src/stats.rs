//! Heap occupancy snapshots.

use serde::Serialize;

use crate::block::BlockState;

/// Lifetime counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapCounters {
    pub allocations: u64,
    pub releases: u64,
    pub reallocations: u64,
    /// Blocks split to serve a smaller request.
    pub splits: u64,
    /// Neighbor merges performed.
    pub coalesces: u64,
    pub arena_requests: u64,
    /// Arena requests refused by the memory source.
    pub arena_failures: u64,
    pub arenas_returned: u64,
    /// Releases rejected as double free or foreign pointer.
    pub rejected_releases: u64,
}

/// Point-in-time view of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    pub arena_count: usize,
    /// Usable bytes across all arenas.
    pub arena_bytes: usize,
    pub live_blocks: usize,
    /// Payload bytes of in-use blocks.
    pub live_bytes: usize,
    pub free_blocks: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    pub largest_free_block: usize,
    pub counters: HeapCounters,
}

impl HeapStats {
    /// Bytes spent on block headers.
    #[must_use]
    pub fn header_bytes(&self) -> usize {
        self.arena_bytes - self.live_bytes - self.free_bytes
    }

    /// Share of free bytes not in the largest free block, in permille.
    #[must_use]
    pub fn fragmentation_permille(&self) -> u16 {
        if self.free_bytes == 0 {
            return 0;
        }
        let scattered = self.free_bytes - self.largest_free_block;
        ((scattered.saturating_mul(1000)) / self.free_bytes) as u16
    }
}

/// One block, as seen by an address-ordered arena walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Base of the containing arena.
    pub arena: usize,
    /// Header address.
    pub addr: usize,
    /// Payload size.
    pub size: usize,
    pub state: BlockState,
}

impl BlockInfo {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state == BlockState::Free
    }
}
