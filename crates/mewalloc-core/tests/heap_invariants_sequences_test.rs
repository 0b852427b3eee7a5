//! Deterministic allocate/release/reallocate sequences checked against the
//! heap invariants after every step.

use std::collections::BTreeMap;
use std::ptr::NonNull;

use mewalloc_core::{ALIGN, Heap, HeapConfig, HeapLogLevel, SystemSource};
use serde_json::Value;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Live {
    ptr: NonNull<u8>,
    len: usize,
    fill: u8,
}

fn write_fill(live: &Live) {
    // SAFETY: the heap guarantees `len` usable bytes at `ptr` while live.
    unsafe { live.ptr.as_ptr().write_bytes(live.fill, live.len) };
}

fn verify_fill(live: &Live) {
    // SAFETY: the block is still live and holds `len` initialized bytes.
    let bytes = unsafe { std::slice::from_raw_parts(live.ptr.as_ptr(), live.len) };
    assert!(
        bytes.iter().all(|&b| b == live.fill),
        "block at {:p} was overwritten",
        live.ptr
    );
}

fn assert_disjoint(live: &[Live]) {
    let mut ranges = BTreeMap::new();
    for l in live {
        let start = l.ptr.as_ptr() as usize;
        assert_eq!(start % ALIGN, 0);
        ranges.insert(start, start + l.len);
    }
    let mut prev_end = 0usize;
    for (&start, &end) in &ranges {
        assert!(start >= prev_end, "live ranges overlap at {start:#x}");
        prev_end = end;
    }
}

fn run_sequence(seed: u64, steps: usize, max_size: usize) {
    let heap = Heap::with_config(
        SystemSource::new(),
        HeapConfig::new().with_min_arena_size(8 * 1024),
    );
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<Live> = Vec::new();
    let mut next_fill = 1u8;

    for step in 0..steps {
        match rng.gen_range(0, 9) {
            0..=4 => {
                let len = rng.gen_range(1, max_size);
                let ptr = heap.allocate(len).unwrap();
                assert!(heap.usable_size(ptr).unwrap() >= len);
                let l = Live {
                    ptr,
                    len,
                    fill: next_fill,
                };
                next_fill = next_fill.wrapping_add(1).max(1);
                write_fill(&l);
                live.push(l);
            }
            5..=7 if !live.is_empty() => {
                let idx = rng.gen_range(0, live.len() - 1);
                let l = live.swap_remove(idx);
                verify_fill(&l);
                heap.release(l.ptr).unwrap();
            }
            8 | 9 if !live.is_empty() => {
                let idx = rng.gen_range(0, live.len() - 1);
                let old = live[idx];
                verify_fill(&old);
                let new_len = rng.gen_range(1, max_size);
                let ptr = heap.reallocate(old.ptr, new_len).unwrap();
                let kept = old.len.min(new_len);
                let moved = Live {
                    ptr,
                    len: kept,
                    fill: old.fill,
                };
                verify_fill(&moved);
                let resized = Live {
                    ptr,
                    len: new_len,
                    fill: old.fill,
                };
                write_fill(&resized);
                live[idx] = resized;
            }
            _ => {}
        }

        assert_disjoint(&live);
        if step % 64 == 0 {
            heap.check_integrity().unwrap();
        }
        let stats = heap.stats();
        assert_eq!(stats.live_blocks, live.len());
    }

    for l in live.drain(..) {
        verify_fill(&l);
        heap.release(l.ptr).unwrap();
    }
    heap.check_integrity().unwrap();
    let stats = heap.stats();
    assert_eq!(stats.live_bytes, 0);
    assert_eq!(stats.free_blocks, stats.arena_count);
    for block in heap.blocks().unwrap() {
        assert!(block.is_free());
    }
}

#[test]
fn small_object_churn() {
    run_sequence(0xA5A5_5A5A_DEAD_BEEF, 3_000, 256);
}

#[test]
fn mixed_size_churn() {
    run_sequence(0x1234_5678_9ABC_DEF0, 2_000, 12_000);
}

#[test]
fn large_object_churn() {
    run_sequence(0x0BAD_F00D_CAFE_D00D, 600, 64 * 1024);
}

#[test]
fn sawtooth_then_full_release_coalesces() {
    let heap = Heap::with_config(
        SystemSource::new(),
        HeapConfig::new().with_min_arena_size(64 * 1024),
    );
    let ptrs: Vec<_> = (1..=200).map(|i| heap.allocate(i * 8).unwrap()).collect();
    for ptr in ptrs.iter().step_by(2) {
        heap.release(*ptr).unwrap();
    }
    assert!(heap.stats().free_blocks > 50);
    heap.check_integrity().unwrap();
    for ptr in ptrs.iter().skip(1).step_by(2) {
        heap.release(*ptr).unwrap();
    }
    let stats = heap.stats();
    assert_eq!(stats.free_blocks, stats.arena_count);
    assert_eq!(stats.live_blocks, 0);
    heap.check_integrity().unwrap();
}

#[test]
fn lifecycle_logs_serialize_as_jsonl() {
    let heap = Heap::with_config(
        SystemSource::new(),
        HeapConfig::new()
            .with_min_arena_size(4096)
            .with_log_level(HeapLogLevel::Trace),
    );
    let a = heap.allocate(64).unwrap();
    let b = heap.reallocate(a, 128).unwrap();
    heap.release(b).unwrap();
    let _ = heap.release(b);

    let lines: Vec<String> = heap
        .drain_lifecycle_logs()
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    assert!(lines.len() >= 4);

    let parsed: Vec<Value> = lines
        .iter()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    for entry in &parsed {
        assert!(entry["decision_id"].as_u64().unwrap() > 0);
        assert!(entry["trace_id"].as_str().unwrap().starts_with("mewalloc::heap::"));
    }
    assert!(parsed.iter().any(|e| e["level"] == "info" && e["event"] == "arena_request"));
    assert!(parsed.iter().any(|e| e["level"] == "trace" && e["symbol"] == "reallocate"));
    assert!(parsed.iter().any(|e| {
        e["level"] == "warn" && e["event"] == "double_free_detected" && e["outcome"] == "double_free"
    }));
}

#[test]
fn stats_serialize_with_counters() {
    let heap = Heap::new();
    let a = heap.allocate(100).unwrap();
    heap.release(a).unwrap();
    let json = serde_json::to_value(heap.stats()).unwrap();
    assert_eq!(json["counters"]["allocations"], 1);
    assert_eq!(json["counters"]["releases"], 1);
    assert_eq!(json["live_blocks"], 0);
    assert_eq!(json["arena_count"], 1);
}
