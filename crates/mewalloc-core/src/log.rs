//! Structured heap lifecycle records.
//!
//! Each heap keeps a bounded ring of records describing allocation decisions,
//! rejected releases and arena traffic. Records serialize to JSON so they can
//! be emitted as JSONL by test and benchmark tooling.

use std::collections::VecDeque;

use serde::Serialize;

/// Heap lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl HeapLogLevel {
    /// Parse from string (case-insensitive). `None` means logging is off.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "off" | "none" | "disabled" => None,
            _ => Some(Self::Info),
        }
    }
}

/// Structured heap lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    pub level: HeapLogLevel,
    /// API symbol (`allocate`, `release`, `reallocate`, ...).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `arena_request`, ...).
    pub event: &'static str,
    /// Pointer or block address involved in the event.
    pub ptr: Option<usize>,
    /// Size involved in the event.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: live block count.
    pub live_blocks: usize,
    /// Snapshot: free block count.
    pub free_blocks: usize,
    /// Snapshot: arena count.
    pub arena_count: usize,
}

/// Fields of a record that the caller supplies.
pub(crate) struct LogEvent {
    pub(crate) level: HeapLogLevel,
    pub(crate) symbol: &'static str,
    pub(crate) event: &'static str,
    pub(crate) ptr: Option<usize>,
    pub(crate) size: Option<usize>,
    pub(crate) outcome: &'static str,
    pub(crate) details: String,
}

/// Counts captured alongside every record.
pub(crate) struct LogSnapshot {
    pub(crate) live_blocks: usize,
    pub(crate) free_blocks: usize,
    pub(crate) arena_count: usize,
}

pub(crate) struct LifecycleLog {
    min_level: HeapLogLevel,
    capacity: usize,
    next_decision_id: u64,
    records: VecDeque<HeapLogRecord>,
}

impl LifecycleLog {
    pub(crate) fn new(min_level: HeapLogLevel, capacity: usize) -> Self {
        Self {
            min_level,
            capacity,
            next_decision_id: 1,
            records: VecDeque::with_capacity(capacity.min(64)),
        }
    }

    pub(crate) fn enabled(&self, level: HeapLogLevel) -> bool {
        self.capacity > 0 && level >= self.min_level
    }

    pub(crate) fn push(&mut self, event: LogEvent, snapshot: LogSnapshot) {
        if !self.enabled(event.level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(HeapLogRecord {
            decision_id,
            trace_id: format!("mewalloc::heap::{}::{:016x}", event.symbol, decision_id),
            level: event.level,
            symbol: event.symbol,
            event: event.event,
            ptr: event.ptr,
            size: event.size,
            outcome: event.outcome,
            details: event.details,
            live_blocks: snapshot.live_blocks,
            free_blocks: snapshot.free_blocks,
            arena_count: snapshot.arena_count,
        });
    }

    pub(crate) fn records(&self) -> Vec<HeapLogRecord> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<HeapLogRecord> {
        self.records.drain(..).collect()
    }
}
