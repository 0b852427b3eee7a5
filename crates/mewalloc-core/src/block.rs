//! Block header layout and guard encoding.
//!
//! Every block in an arena starts with a 16-byte header: the payload size
//! followed by a guard tag. The tag folds the block state, the header address
//! and the size together, so bytes that were never written as a header (or a
//! header whose size was overwritten) fail to decode.

use serde::Serialize;

/// Alignment of every payload and every header.
pub const ALIGN: usize = 16;

/// Bytes of metadata in front of every block.
pub const HEADER_SIZE: usize = 16;

/// Smallest payload a block can carry.
pub const MIN_PAYLOAD: usize = ALIGN;

const LIVE_GUARD: u64 = 0x6d65_7761_6c6c_6f63; // "mewalloc"
const FREE_GUARD: u64 = 0x6672_6565_626c_6b21; // "freeblk!"

/// Whether a block is handed out or sitting in the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockState {
    Free,
    InUse,
}

impl BlockState {
    const fn guard(self) -> u64 {
        match self {
            Self::Free => FREE_GUARD,
            Self::InUse => LIVE_GUARD,
        }
    }
}

/// In-memory header representation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub(crate) size: u64,
    pub(crate) tag: u64,
}

const _: () = assert!(std::mem::size_of::<RawHeader>() == HEADER_SIZE);

impl RawHeader {
    /// Builds the header for a block at `addr` with `size` payload bytes.
    pub(crate) fn encode(addr: usize, size: usize, state: BlockState) -> Self {
        let size = size as u64;
        Self {
            size,
            tag: tag_for(addr, size, state),
        }
    }

    /// Recovers `(size, state)` if the guard tag matches this address.
    pub(crate) fn decode(self, addr: usize) -> Option<(usize, BlockState)> {
        let size = usize::try_from(self.size).ok()?;
        [BlockState::InUse, BlockState::Free]
            .into_iter()
            .find(|&state| self.tag == tag_for(addr, self.size, state))
            .map(|state| (size, state))
    }
}

fn tag_for(addr: usize, size: u64, state: BlockState) -> u64 {
    state.guard() ^ (addr as u64) ^ size.rotate_left(29)
}

/// Rounds a request up to the payload granularity.
///
/// Returns `None` when the rounded value does not fit in `usize`.
pub fn round_up(size: usize) -> Option<usize> {
    let size = size.max(MIN_PAYLOAD);
    size.checked_add(ALIGN - 1).map(|s| s & !(ALIGN - 1))
}

/// Address one past the end of the block whose header sits at `addr`.
pub(crate) const fn block_end(addr: usize, size: usize) -> usize {
    addr + HEADER_SIZE + size
}

/// Whether a block with `available` payload bytes should be split to serve
/// `needed` bytes. The remainder must exceed one header to be worth keeping.
pub(crate) const fn should_split(available: usize, needed: usize) -> bool {
    available - needed > HEADER_SIZE
}
