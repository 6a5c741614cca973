#![allow(unsafe_code)]

use quickalloc_core::{AllocError, OomSource, QuickAlloc, QuickAllocConfig, SteppingMethod};

#[test]
fn exhausted_pool_reports_oom_and_keeps_blocks_usable() {
    let alloc = QuickAlloc::create(64 * 1024, 256, 1024, SteppingMethod::Linear, true).unwrap();
    let mut blocks = Vec::new();
    let err = loop {
        match alloc.malloc(500) {
            Ok(Some(p)) => blocks.push(p),
            Ok(None) => unreachable!("non-zero request"),
            Err(err) => break err,
        }
    };
    assert!(
        matches!(
            err,
            AllocError::OutOfMemory {
                origin: OomSource::ArenaExhausted,
                requested: 768,
                ..
            }
        ),
        "{err:?}"
    );
    assert!(err.is_recoverable());
    assert!(!blocks.is_empty());

    // Every earlier block is still writable and keeps its contents.
    for (i, p) in blocks.iter().enumerate() {
        // SAFETY: each block holds at least 500 bytes.
        unsafe { std::ptr::write_bytes(p.as_ptr(), i as u8, 500) };
    }
    for (i, p) in blocks.iter().enumerate() {
        // SAFETY: as above.
        let bytes = unsafe { std::slice::from_raw_parts(p.as_ptr(), 500) };
        assert!(bytes.iter().all(|&b| b == i as u8));
        assert!(alloc.owns(p.as_ptr()));
    }

    // A smaller class may still fit the remaining tail.
    let stats = alloc.stats();
    assert!(stats.remaining_bytes < 768);
    assert_eq!(stats.live_blocks, blocks.len());
    assert!(stats.failed_allocations >= 1);

    // Freed blocks are served again without touching the arena.
    let carved = stats.carved_bytes;
    alloc.free(blocks[0].as_ptr()).unwrap();
    let again = alloc.malloc(500).unwrap().unwrap();
    assert_eq!(again, blocks[0]);
    assert_eq!(alloc.stats().carved_bytes, carved);
}

#[test]
fn failed_allocation_does_not_advance_arena() {
    let alloc = QuickAlloc::create(8 * 1024, 256, 4096, SteppingMethod::Linear, true).unwrap();
    let big = alloc.malloc(4000).unwrap().unwrap();
    let before = alloc.stats();
    assert!(matches!(
        alloc.malloc(4000),
        Err(AllocError::OutOfMemory { .. })
    ));
    let after = alloc.stats();
    assert_eq!(before.carved_bytes, after.carved_bytes);
    assert_eq!(before.live_blocks, after.live_blocks);
    assert!(alloc.malloc(16).unwrap().is_some());
    alloc.free(big.as_ptr()).unwrap();
}

#[test]
fn reservation_larger_than_address_space_is_refused() {
    let config = QuickAllocConfig::new(usize::MAX / 2, 256, 1024, SteppingMethod::Linear, true);
    let err = QuickAlloc::with_config(config).unwrap_err();
    assert_eq!(
        err,
        AllocError::OutOfMemory {
            requested: usize::MAX / 2,
            remaining: 0,
            origin: OomSource::Reservation,
        }
    );
}
