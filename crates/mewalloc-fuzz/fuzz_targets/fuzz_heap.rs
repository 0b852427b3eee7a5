#![no_main]
use std::ptr::NonNull;

use libfuzzer_sys::fuzz_target;
use mewalloc_core::{Heap, HeapConfig, HeapError, SystemSource};

// Each 4-byte chunk is one operation: opcode, little-endian size, selector.
fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    let heap = Heap::with_config(
        SystemSource::with_limit(1 << 22),
        HeapConfig::new().with_min_arena_size(4096),
    );
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for (step, chunk) in data.chunks_exact(4).enumerate() {
        let size = usize::from(u16::from_le_bytes([chunk[1], chunk[2]]));
        let pick = usize::from(chunk[3]);
        let fill = (step as u8) | 1;

        match chunk[0] % 5 {
            0 => match heap.allocate(size) {
                Ok(ptr) => {
                    // SAFETY: fresh block of at least `size` bytes.
                    unsafe { ptr.as_ptr().write_bytes(fill, size) };
                    live.push((ptr, size, fill));
                }
                Err(HeapError::InvalidArgument { .. } | HeapError::OutOfMemory { .. }) => {}
                Err(err) => panic!("allocate({size}) failed: {err}"),
            },
            1 if !live.is_empty() => {
                let (ptr, len, fill) = live.swap_remove(pick % live.len());
                // SAFETY: block is live and was filled with `fill`.
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
                assert!(bytes.iter().all(|&b| b == fill));
                heap.release(ptr).expect("release live block");
            }
            2 if !live.is_empty() => {
                let idx = pick % live.len();
                let (ptr, len, fill) = live[idx];
                match heap.reallocate(ptr, size) {
                    Ok(new_ptr) => {
                        let kept = len.min(size);
                        // SAFETY: the first `kept` bytes carried over from the old block.
                        let bytes = unsafe { std::slice::from_raw_parts(new_ptr.as_ptr(), kept) };
                        assert!(bytes.iter().all(|&b| b == fill));
                        // SAFETY: block holds at least `size` bytes.
                        unsafe { new_ptr.as_ptr().write_bytes(fill, size) };
                        live[idx] = (new_ptr, size, fill);
                    }
                    Err(HeapError::InvalidArgument { .. } | HeapError::OutOfMemory { .. }) => {}
                    Err(err) => panic!("reallocate({size}) failed: {err}"),
                }
            }
            3 if !live.is_empty() => {
                // Releasing the same pointer twice must be rejected.
                let (ptr, _, _) = live.swap_remove(pick % live.len());
                heap.release(ptr).expect("release live block");
                assert!(heap.release(ptr).is_err());
            }
            4 => {
                heap.trim();
                heap.check_integrity().expect("integrity");
            }
            _ => {}
        }
    }

    heap.check_integrity().expect("integrity");
    for (ptr, _, _) in live {
        heap.release(ptr).expect("release live block");
    }
    let stats = heap.stats();
    assert_eq!(stats.free_blocks, stats.arena_count);
});
