//! # mewalloc-core
//!
//! General-purpose heap allocator for the mew runtime.
//!
//! The heap obtains arenas from a [`MemorySource`], carves them into blocks
//! with 16-byte headers, and serves requests best-fit from a free list.
//! Released blocks are coalesced with free neighbors immediately.
//!
//! # Architecture
//!
//! - **Block headers** (`block`): size plus a guard tag that encodes the block
//!   state and rejects stale or foreign headers
//! - **Arenas** (`arena`): bounds-checked raw access to one source region
//! - **Free list** (`free_list`): best-fit index plus address index for neighbors
//! - **Heap** (`heap`): allocation, release, resize, trim and integrity walks
//! - **Memory source** (`source`): the operating-environment collaborator
//! - **Configuration** (`config`): arena sizing, check level, log level
//! - **Lifecycle log** (`log`): bounded ring of structured records
//! - **Stats** (`stats`): occupancy snapshots and lifetime counters

#![deny(unsafe_code)]

pub mod arena;
pub mod block;
pub mod config;
pub mod error;
mod free_list;
pub mod heap;
pub mod log;
pub mod source;
pub mod stats;

pub use arena::ArenaInfo;
pub use block::{ALIGN, BlockState, HEADER_SIZE};
pub use config::{CheckLevel, HeapConfig};
pub use error::HeapError;
pub use heap::Heap;
pub use log::{HeapLogLevel, HeapLogRecord};
pub use source::{MemorySource, Region, SystemSource};
pub use stats::{BlockInfo, HeapCounters, HeapStats};
