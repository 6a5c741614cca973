#![no_main]
use libfuzzer_sys::fuzz_target;
use quickalloc_core::{AllocError, QuickAlloc, QuickAllocConfig, SteppingMethod};

fuzz_target!(|data: &[u8]| {
    // Each 4-byte chunk is one operation: opcode, 16-bit size, slot selector.
    if data.len() < 4 {
        return;
    }

    let stepping = if data[0] & 1 == 0 {
        SteppingMethod::Linear
    } else {
        SteppingMethod::Geometric
    };
    let config = QuickAllocConfig::new(1 << 20, 32, 8192, stepping, data[0] & 2 == 0);
    let Ok(alloc) = QuickAlloc::with_config(config) else {
        return;
    };
    let alignment = alloc.alignment();
    let mut live: Vec<(usize, usize)> = Vec::new();

    for chunk in data[1..].chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize;
        let slot = chunk[3] as usize;

        match chunk[0] % 5 {
            0 => match alloc.malloc(size) {
                Ok(Some(ptr)) => {
                    let addr = ptr.as_ptr() as usize;
                    assert_eq!(addr % alignment, 0);
                    assert!(live.iter().all(|&(a, _)| a != addr));
                    assert!(alloc.usable_size(ptr.as_ptr()).unwrap() >= size);
                    live.push((addr, size));
                }
                Ok(None) => assert_eq!(size, 0),
                Err(AllocError::OutOfMemory { .. } | AllocError::RequestTooLarge { .. }) => {}
                Err(err) => panic!("unexpected malloc error: {err}"),
            },
            1 => {
                if !live.is_empty() {
                    let (addr, _) = live.swap_remove(slot % live.len());
                    alloc.free(addr as *mut u8).unwrap();
                }
            }
            2 => {
                if !live.is_empty() {
                    let idx = slot % live.len();
                    let (addr, _) = live[idx];
                    match alloc.realloc(addr as *mut u8, size) {
                        Ok(Some(ptr)) => {
                            assert_eq!(ptr.as_ptr() as usize % alignment, 0);
                            live[idx] = (ptr.as_ptr() as usize, size);
                        }
                        Ok(None) => {
                            assert_eq!(size, 0);
                            live.swap_remove(idx);
                        }
                        Err(_) => {
                            // The original block stays allocated.
                            assert!(alloc.owns(addr as *const u8));
                            assert!(alloc.usable_size(addr as *const u8).is_ok());
                        }
                    }
                }
            }
            3 => {
                // Freed and interior addresses must be rejected without side effects.
                let before = alloc.stats().live_blocks;
                let probe = match live.get(slot % live.len().max(1)) {
                    Some(&(addr, _)) => addr + 1 + (size % 15),
                    None => size | 1,
                };
                assert!(alloc.free(probe as *mut u8).is_err());
                assert_eq!(alloc.stats().live_blocks, before);
            }
            _ => {
                let stats = alloc.stats();
                assert_eq!(stats.live_blocks, live.len());
                assert!(stats.carved_bytes <= alloc.config().pool_size);
            }
        }
    }

    for (addr, _) in live {
        alloc.free(addr as *mut u8).unwrap();
    }
    assert_eq!(alloc.stats().live_blocks, 0);
});
