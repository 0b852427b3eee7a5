//! Free block index.
//!
//! Free blocks are indexed twice: by `(size, address)` for best-fit search and
//! by address for neighbor lookup during coalescing. Both indexes always hold
//! the same set of blocks.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub(crate) struct FreeList {
    by_size: BTreeSet<(usize, usize)>,
    by_addr: BTreeMap<usize, usize>,
}

impl FreeList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, addr: usize, size: usize) {
        if let Some(old) = self.by_addr.insert(addr, size) {
            self.by_size.remove(&(old, addr));
        }
        self.by_size.insert((size, addr));
    }

    /// Removes the block at `addr`, returning its payload size.
    pub(crate) fn remove(&mut self, addr: usize) -> Option<usize> {
        let size = self.by_addr.remove(&addr)?;
        self.by_size.remove(&(size, addr));
        Some(size)
    }

    pub(crate) fn contains(&self, addr: usize) -> bool {
        self.by_addr.contains_key(&addr)
    }

    pub(crate) fn size_of(&self, addr: usize) -> Option<usize> {
        self.by_addr.get(&addr).copied()
    }

    /// Smallest block with at least `needed` payload bytes, lowest address first
    /// among equals.
    pub(crate) fn best_fit(&self, needed: usize) -> Option<(usize, usize)> {
        self.by_size
            .range((needed, 0)..)
            .next()
            .map(|&(size, addr)| (addr, size))
    }

    /// Free block with the highest address below `addr`.
    pub(crate) fn preceding(&self, addr: usize) -> Option<(usize, usize)> {
        self.by_addr
            .range(..addr)
            .next_back()
            .map(|(&a, &s)| (a, s))
    }

    /// Free blocks whose header lies in `[start, end)`, address-ordered.
    pub(crate) fn in_range(&self, start: usize, end: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.by_addr.range(start..end).map(|(&a, &s)| (a, s))
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.by_addr.iter().map(|(&a, &s)| (a, s))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.by_addr.values().sum()
    }

    pub(crate) fn largest(&self) -> Option<usize> {
        self.by_size.last().map(|&(size, _)| size)
    }
}
