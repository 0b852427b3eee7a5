//! Heap benchmarks against the host `malloc`.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mewalloc_abi::alloc_abi::{__allocator_alloc, __allocator_free};
use mewalloc_core::{Heap, HeapConfig, SystemSource};

const SIZES: &[usize] = &[16, 64, 256, 1024, 4096, 32768];

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_free_cycle");
    let heap = Heap::new();

    for &size in SIZES {
        group.bench_with_input(BenchmarkId::new("mewalloc", size), &size, |b, &sz| {
            b.iter(|| {
                let ptr = heap.allocate(sz).expect("allocate");
                heap.release(black_box(ptr)).expect("release");
            });
        });
        group.bench_with_input(BenchmarkId::new("mewalloc_abi", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: pointer comes straight from the allocator.
                unsafe { __allocator_free(black_box(__allocator_alloc(sz))) };
            });
        });
        group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &sz| {
            b.iter(|| {
                // SAFETY: pointer comes straight from malloc.
                unsafe { libc::free(black_box(libc::malloc(sz))) };
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("mewalloc_1000x64B", |b| {
        let heap = Heap::new();
        b.iter(|| {
            let ptrs: Vec<_> = (0..1000).map(|_| heap.allocate(64).expect("allocate")).collect();
            for ptr in black_box(ptrs) {
                heap.release(ptr).expect("release");
            }
        });
    });
    group.bench_function("libc_1000x64B", |b| {
        b.iter(|| {
            // SAFETY: malloc has no preconditions.
            let ptrs: Vec<_> = (0..1000).map(|_| unsafe { libc::malloc(64) }).collect();
            for ptr in black_box(ptrs) {
                // SAFETY: `ptr` came from the malloc above and is freed once.
                unsafe { libc::free(ptr) };
            }
        });
    });

    group.finish();
}

/// Interleaved releases leave holes, so best-fit search and coalescing both
/// show up in the timing.
fn bench_fragmented_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_reuse");

    group.bench_function("mewalloc_sawtooth", |b| {
        let heap = Heap::with_config(
            SystemSource::new(),
            HeapConfig::new().with_min_arena_size(1 << 20),
        );
        let pinned: Vec<_> = (0..512)
            .map(|i| heap.allocate(16 + (i % 32) * 16).expect("allocate"))
            .collect();
        for ptr in pinned.iter().step_by(2) {
            heap.release(*ptr).expect("release");
        }
        b.iter(|| {
            let ptr = heap.allocate(black_box(200)).expect("allocate");
            heap.release(ptr).expect("release");
        });
    });

    group.bench_function("mewalloc_reallocate_grow", |b| {
        let heap = Heap::new();
        b.iter(|| {
            let mut ptr = heap.allocate(16).expect("allocate");
            for size in [64, 256, 1024, 4096] {
                ptr = heap.reallocate(ptr, size).expect("reallocate");
            }
            heap.release(black_box(ptr)).expect("release");
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_alloc_free_cycle,
    bench_alloc_burst,
    bench_fragmented_reuse
);
criterion_main!(benches);
