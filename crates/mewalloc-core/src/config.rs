//! Heap configuration.
//!
//! The process-wide configuration is read from the environment:
//! - `MEWALLOC_CHECKS`: `strict` (default) re-reads the header of every free
//!   block before reusing it, so writes into freed memory that reach a header
//!   are reported; `off` trusts the free list. Released pointers are always
//!   checked against their guard tag.
//! - `MEWALLOC_MIN_ARENA`: smallest arena requested from the memory source, in
//!   bytes, with an optional `k`/`m` suffix.
//! - `MEWALLOC_LOG`: minimum lifecycle log level (`trace`, `debug`, `info`,
//!   `warn`, `error`) or `off`.

use std::sync::OnceLock;

use crate::block::{ALIGN, HEADER_SIZE, MIN_PAYLOAD};
use crate::log::HeapLogLevel;

pub const ENV_CHECKS: &str = "MEWALLOC_CHECKS";
pub const ENV_MIN_ARENA: &str = "MEWALLOC_MIN_ARENA";
pub const ENV_LOG: &str = "MEWALLOC_LOG";

/// Default smallest arena.
pub const DEFAULT_MIN_ARENA_SIZE: usize = 64 * 1024;

/// Default lifecycle log ring capacity.
pub const DEFAULT_LOG_CAPACITY: usize = 1024;

/// Smallest arena that can hold one minimal block.
pub const MIN_ARENA_FLOOR: usize = HEADER_SIZE + MIN_PAYLOAD;

/// Validation depth applied when free blocks are reused.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckLevel {
    /// Decode the free block's header before handing it out.
    #[default]
    Strict,
    /// Trust the free list.
    Off,
}

impl CheckLevel {
    /// Parse from string (case-insensitive). Unknown values map to `Strict`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "fast" | "disabled" => Self::Off,
            _ => Self::Strict,
        }
    }

    #[must_use]
    pub const fn verifies_free_blocks(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Tunables for one [`Heap`](crate::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    pub min_arena_size: usize,
    pub checks: CheckLevel,
    pub log_level: HeapLogLevel,
    /// Zero disables lifecycle logging.
    pub log_capacity: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            min_arena_size: DEFAULT_MIN_ARENA_SIZE,
            checks: CheckLevel::Strict,
            log_level: HeapLogLevel::Info,
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl HeapConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the smallest arena, clamped to [`MIN_ARENA_FLOOR`] and rounded up
    /// to the block alignment.
    #[must_use]
    pub fn with_min_arena_size(mut self, bytes: usize) -> Self {
        let bytes = bytes.max(MIN_ARENA_FLOOR);
        self.min_arena_size = bytes.div_ceil(ALIGN).saturating_mul(ALIGN);
        self
    }

    #[must_use]
    pub fn with_checks(mut self, checks: CheckLevel) -> Self {
        self.checks = checks;
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: HeapLogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Builds a configuration from a key lookup, starting from the defaults.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_CHECKS) {
            config = config.with_checks(CheckLevel::from_str_loose(&v));
        }
        if let Some(bytes) = lookup(ENV_MIN_ARENA).and_then(|v| parse_byte_count(&v)) {
            config = config.with_min_arena_size(bytes);
        }
        if let Some(v) = lookup(ENV_LOG) {
            match HeapLogLevel::from_str_loose(&v) {
                Some(level) => config = config.with_log_level(level),
                None => config = config.with_log_capacity(0),
            }
        }
        config
    }

    /// Builds a configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Parses `4096`, `64k`, `2M` and similar.
#[must_use]
pub fn parse_byte_count(s: &str) -> Option<usize> {
    let s = s.trim();
    let (digits, shift) = match s.as_bytes().last()? {
        b'k' | b'K' => (&s[..s.len() - 1], 10),
        b'm' | b'M' => (&s[..s.len() - 1], 20),
        _ => (s, 0),
    };
    let value: usize = digits.trim().parse().ok()?;
    value.checked_mul(1usize << shift)
}

static GLOBAL_CONFIG: OnceLock<HeapConfig> = OnceLock::new();

/// Process-wide configuration (reads the environment on first call, caches
/// thereafter).
#[must_use]
pub fn global_config() -> HeapConfig {
    *GLOBAL_CONFIG.get_or_init(HeapConfig::from_env)
}
