//! Allocation scenarios with a 4096-byte minimum arena and 16-byte headers.

use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mewalloc_core::{
    HEADER_SIZE, Heap, HeapConfig, HeapError, MemorySource, Region, SystemSource,
};

const ARENA: usize = 4096;

/// System source that remembers every request size.
#[derive(Default)]
struct RecordingSource {
    inner: SystemSource,
    requests: Vec<usize>,
    returned: Arc<AtomicUsize>,
}

// SAFETY: forwards to `SystemSource`, which upholds the contract.
unsafe impl MemorySource for RecordingSource {
    fn request_memory(&mut self, byte_count: usize) -> Option<Region> {
        self.requests.push(byte_count);
        self.inner.request_memory(byte_count)
    }

    fn return_memory(&mut self, region: Region) {
        self.returned.fetch_add(1, Ordering::Relaxed);
        self.inner.return_memory(region);
    }
}

/// Source that hands out regions one header shorter than requested.
#[derive(Default)]
struct ShortSource {
    inner: SystemSource,
}

// SAFETY: the shortened region is a prefix of a valid `SystemSource` region;
// the full region is rebuilt before it is handed back.
unsafe impl MemorySource for ShortSource {
    fn request_memory(&mut self, byte_count: usize) -> Option<Region> {
        let region = self.inner.request_memory(byte_count)?;
        // SAFETY: a prefix of a region is valid for the shorter length.
        Some(unsafe { Region::from_raw_parts(region.base(), region.size() - HEADER_SIZE) })
    }

    fn return_memory(&mut self, region: Region) {
        // SAFETY: restores the size the inner source allocated.
        let full = unsafe { Region::from_raw_parts(region.base(), region.size() + HEADER_SIZE) };
        self.inner.return_memory(full);
    }
}

fn recording_heap() -> Heap<RecordingSource> {
    Heap::with_config(
        RecordingSource::default(),
        HeapConfig::new().with_min_arena_size(ARENA),
    )
}

fn requests(heap: &Heap<RecordingSource>) -> Vec<usize> {
    heap.inspect_source(|s| s.requests.clone())
}

fn addr(ptr: NonNull<u8>) -> usize {
    ptr.as_ptr() as usize
}

#[test]
fn freed_space_is_reused_before_new_arena() {
    let heap = recording_heap();
    let first = heap.allocate(100).unwrap();
    let second = heap.allocate(200).unwrap();
    assert!(addr(second) >= addr(first) + 100);

    heap.release(first).unwrap();
    let third = heap.allocate(50).unwrap();

    assert_eq!(third, first, "best fit must reuse the first block");
    assert_eq!(requests(&heap), vec![ARENA]);
    heap.check_integrity().unwrap();
}

#[test]
fn full_arena_request_gets_header_headroom() {
    let heap = recording_heap();
    let small = heap.allocate(100).unwrap();
    let big = heap.allocate(ARENA).unwrap();

    assert_eq!(requests(&heap), vec![ARENA, ARENA + HEADER_SIZE]);
    assert!(heap.usable_size(big).unwrap() >= ARENA);
    let arenas = heap.arenas();
    assert_eq!(arenas.len(), 2);
    assert!(arenas.iter().any(|a| a.size == ARENA + HEADER_SIZE));

    heap.release(small).unwrap();
    heap.release(big).unwrap();
    heap.check_integrity().unwrap();
}

#[test]
fn request_below_minimum_uses_minimum_arena() {
    let heap = recording_heap();
    let _ = heap.allocate(1).unwrap();
    assert_eq!(requests(&heap), vec![ARENA]);
}

#[test]
fn adjacent_releases_coalesce() {
    let heap = recording_heap();
    let a = heap.allocate(64).unwrap();
    let b = heap.allocate(96).unwrap();
    assert_eq!(addr(b), addr(a) + 64 + HEADER_SIZE, "blocks must be adjacent");

    heap.release(a).unwrap();
    heap.release(b).unwrap();

    let blocks = heap.blocks().unwrap();
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].is_free());
    assert_eq!(blocks[0].size, ARENA - HEADER_SIZE);
    assert_eq!(heap.stats().free_blocks, 1);
    assert!(heap.stats().counters.coalesces >= 2);
}

#[test]
fn releasing_everything_leaves_one_free_block_per_arena() {
    let heap = recording_heap();
    let ptrs: Vec<_> = [100, 3000, 5000, 17, 2048, 4096, 12]
        .iter()
        .map(|&n| heap.allocate(n).unwrap())
        .collect();
    assert!(heap.stats().arena_count > 1);

    for (i, ptr) in ptrs.iter().enumerate().rev() {
        if i % 2 == 0 {
            heap.release(*ptr).unwrap();
        }
    }
    for (i, ptr) in ptrs.iter().enumerate() {
        if i % 2 == 1 {
            heap.release(*ptr).unwrap();
        }
    }

    let stats = heap.stats();
    assert_eq!(stats.live_blocks, 0);
    assert_eq!(stats.free_blocks, stats.arena_count);
    for arena in heap.arenas() {
        let blocks: Vec<_> = heap
            .blocks()
            .unwrap()
            .into_iter()
            .filter(|b| b.arena == arena.base)
            .collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, arena.size - HEADER_SIZE);
    }
    heap.check_integrity().unwrap();
}

#[test]
fn zero_size_policy_is_invalid_argument() {
    let heap = recording_heap();
    assert_eq!(heap.allocate(0), Err(HeapError::InvalidArgument { size: 0 }));
    assert!(requests(&heap).is_empty());
}

#[test]
fn exhausted_source_reports_oom_without_side_effects() {
    let heap = Heap::with_config(
        SystemSource::with_limit(ARENA),
        HeapConfig::new().with_min_arena_size(ARENA),
    );
    let a = heap.allocate(1000).unwrap();
    let before = heap.blocks().unwrap();

    assert_eq!(
        heap.allocate(ARENA),
        Err(HeapError::OutOfMemory { requested: ARENA })
    );

    assert_eq!(heap.blocks().unwrap(), before);
    assert_eq!(heap.stats().counters.arena_failures, 1);
    heap.check_integrity().unwrap();

    // The existing arena still serves requests that fit.
    let b = heap.allocate(1000).unwrap();
    heap.release(a).unwrap();
    heap.release(b).unwrap();
}

#[test]
fn double_release_reports_double_free() {
    let heap = recording_heap();
    let a = heap.allocate(32).unwrap();
    heap.release(a).unwrap();
    assert_eq!(heap.release(a), Err(HeapError::DoubleFree { ptr: addr(a) }));
    heap.check_integrity().unwrap();
}

#[test]
fn foreign_pointer_reports_invalid_pointer() {
    let heap = recording_heap();
    let _ = heap.allocate(32).unwrap();
    let mut local = [0u8; 32];
    let foreign = NonNull::new(local.as_mut_ptr()).unwrap();
    assert_eq!(
        heap.release(foreign),
        Err(HeapError::InvalidPointer {
            ptr: addr(foreign)
        })
    );
}

#[test]
fn pointer_from_another_heap_is_rejected() {
    let one = recording_heap();
    let two = recording_heap();
    let a = one.allocate(64).unwrap();
    let _ = two.allocate(64).unwrap();
    assert!(matches!(
        two.release(a),
        Err(HeapError::InvalidPointer { .. })
    ));
    one.release(a).unwrap();
}

#[test]
fn drop_returns_every_arena() {
    let heap = recording_heap();
    let _ = heap.allocate(10).unwrap();
    let _ = heap.allocate(ARENA * 2).unwrap();
    assert_eq!(heap.stats().arena_count, 2);
    let returned = heap.inspect_source(|s| Arc::clone(&s.returned));
    assert_eq!(returned.load(Ordering::Relaxed), 0);
    drop(heap);
    assert_eq!(returned.load(Ordering::Relaxed), 2);
}

#[test]
fn short_region_from_source_is_out_of_memory() {
    let heap = Heap::with_config(
        ShortSource::default(),
        HeapConfig::new().with_min_arena_size(ARENA),
    );
    assert_eq!(
        heap.allocate(100),
        Err(HeapError::OutOfMemory { requested: 100 })
    );
    assert!(heap.arenas().is_empty());
    assert_eq!(heap.stats().counters.arena_failures, 1);
    assert_eq!(heap.inspect_source(|s| s.inner.outstanding()), 0);
}
