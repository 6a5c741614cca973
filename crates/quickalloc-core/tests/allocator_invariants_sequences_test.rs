#![allow(unsafe_code)]

use std::ptr::NonNull;

use quickalloc_core::{
    AllocError, InvalidPointerReason, QuickAlloc, QuickAllocConfig, SteppingMethod,
};

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Empty,
    Live,
    Freed,
}

fn stamp(ptr: NonNull<u8>, len: usize, tag: u8) {
    for i in 0..len {
        // SAFETY: the block holds at least `len` bytes.
        unsafe { ptr.as_ptr().add(i).write(tag ^ (i as u8)) };
    }
}

fn stamped(ptr: NonNull<u8>, len: usize, tag: u8) -> bool {
    // SAFETY: the block holds at least `len` bytes.
    (0..len).all(|i| unsafe { ptr.as_ptr().add(i).read() } == tag ^ (i as u8))
}

fn run_sequence(alloc: &QuickAlloc, seed: u64, steps: usize) {
    const SLOTS: usize = 48;
    let max_payload = alloc.size_classes().max_payload();
    let alignment = alloc.alignment();
    let mut rng = XorShift64::new(seed);

    let mut ptrs = [None::<NonNull<u8>>; SLOTS];
    let mut sizes = [0_usize; SLOTS];
    let mut states = [SlotState::Empty; SLOTS];

    for step in 0..steps {
        let op = rng.gen_range_usize(0, 99);
        let idx = rng.gen_range_usize(0, SLOTS - 1);
        let tag = idx as u8;

        match op {
            // allocate (biased)
            0..=39 => {
                if states[idx] == SlotState::Live {
                    continue;
                }
                let size = rng.gen_range_usize(1, max_payload);
                let ptr = alloc
                    .malloc(size)
                    .unwrap_or_else(|e| {
                        panic!("seed={seed} step={step}: malloc({size}) failed: {e}")
                    })
                    .expect("non-zero request");
                assert_eq!(
                    ptr.as_ptr() as usize % alignment,
                    0,
                    "seed={seed} step={step}: misaligned payload"
                );
                let usable = alloc.usable_size(ptr.as_ptr()).unwrap();
                let class = alloc.size_classes().class_for(size).unwrap();
                assert_eq!(usable, alloc.size_classes().payload_capacity(class));
                assert!(usable >= size);
                stamp(ptr, size, tag);
                ptrs[idx] = Some(ptr);
                sizes[idx] = size;
                states[idx] = SlotState::Live;
            }
            // realloc
            40..=64 => {
                if states[idx] != SlotState::Live {
                    continue;
                }
                let old = ptrs[idx].unwrap();
                let old_class = alloc.size_classes().class_for(sizes[idx]).unwrap();
                let new_size = rng.gen_range_usize(1, max_payload);
                let new_class = alloc.size_classes().class_for(new_size).unwrap();
                let new = alloc.realloc(old.as_ptr(), new_size).unwrap().unwrap();
                if old_class == new_class {
                    assert_eq!(
                        new, old,
                        "seed={seed} step={step}: same class must stay in place"
                    );
                }
                assert_eq!(new.as_ptr() as usize % alignment, 0);
                let kept = sizes[idx].min(new_size);
                assert!(
                    stamped(new, kept, tag),
                    "seed={seed} step={step}: realloc lost payload bytes"
                );
                stamp(new, new_size, tag);
                ptrs[idx] = Some(new);
                sizes[idx] = new_size;
            }
            // free
            65..=89 => match states[idx] {
                SlotState::Live => {
                    let ptr = ptrs[idx].unwrap();
                    assert!(
                        stamped(ptr, sizes[idx], tag),
                        "seed={seed} step={step}: payload clobbered"
                    );
                    alloc.free(ptr.as_ptr()).unwrap();
                    states[idx] = SlotState::Freed;
                }
                SlotState::Freed => {
                    let ptr = ptrs[idx].unwrap();
                    // The block may have been handed to another slot since.
                    let reused = (0..SLOTS)
                        .any(|j| states[j] == SlotState::Live && ptrs[j] == Some(ptr));
                    if !reused {
                        assert_eq!(
                            alloc.free(ptr.as_ptr()),
                            Err(AllocError::InvalidPointer {
                                addr: ptr.as_ptr() as usize,
                                reason: InvalidPointerReason::DoubleFree,
                            }),
                            "seed={seed} step={step}"
                        );
                    }
                }
                SlotState::Empty => {
                    alloc.free(std::ptr::null_mut()).unwrap();
                }
            },
            // interior pointers are never accepted
            _ => {
                if states[idx] != SlotState::Live {
                    continue;
                }
                let ptr = ptrs[idx].unwrap();
                let interior = ptr.as_ptr().wrapping_add(rng.gen_range_usize(1, alignment - 1));
                assert!(
                    matches!(alloc.free(interior), Err(AllocError::InvalidPointer { .. })),
                    "seed={seed} step={step}: interior free must be rejected"
                );
            }
        }

        let mut live: Vec<usize> = (0..SLOTS)
            .filter(|&j| states[j] == SlotState::Live)
            .map(|j| ptrs[j].unwrap().as_ptr() as usize)
            .collect();
        let count = live.len();
        live.sort_unstable();
        live.dedup();
        assert_eq!(live.len(), count, "seed={seed} step={step}: live pointers alias");
        assert_eq!(alloc.stats().live_blocks, count, "seed={seed} step={step}");
    }
}

#[test]
fn deterministic_sequences_hold_allocator_invariants() {
    const SEEDS: [u64; 4] = [1, 2, 3, 0x5EED_CAFE];
    for seed in SEEDS {
        let alloc =
            QuickAlloc::create(16 << 20, 256, 8 * 1024, SteppingMethod::Linear, true).unwrap();
        run_sequence(&alloc, seed, 3_000);
    }
}

#[test]
fn deterministic_sequences_geometric_min_alignment() {
    for seed in [7_u64, 11, 13] {
        let alloc =
            QuickAlloc::create(8 << 20, 32, 16 * 1024, SteppingMethod::Geometric, false).unwrap();
        assert_eq!(alloc.alignment(), 16);
        run_sequence(&alloc, seed, 3_000);
    }
}

#[test]
fn deterministic_sequences_large_alignment() {
    let config = QuickAllocConfig::new(16 << 20, 64, 4096, SteppingMethod::Geometric, true)
        .with_alignment(4096);
    let alloc = QuickAlloc::with_config(config).unwrap();
    assert_eq!(alloc.alignment(), 4096);
    run_sequence(&alloc, 99, 1_500);
}

#[test]
fn every_size_up_to_max_is_aligned_and_fits_its_class() {
    let alloc = QuickAlloc::create(64 << 20, 256, 4096, SteppingMethod::Linear, true).unwrap();
    let table = alloc.size_classes().clone();
    for n in 1..=4096 {
        let ptr = alloc.malloc(n).unwrap().unwrap();
        assert_eq!(ptr.as_ptr() as usize % 256, 0, "n={n}");
        let usable = alloc.usable_size(ptr.as_ptr()).unwrap();
        assert!(usable >= n);
        assert_eq!(usable, table.payload_capacity(table.class_for(n).unwrap()));
        alloc.free(ptr.as_ptr()).unwrap();
    }
}

#[test]
fn free_then_malloc_same_class_is_lifo() {
    let alloc = QuickAlloc::create_default().unwrap();
    for n in [1, 200, 1000, 30_000] {
        let _other = alloc.malloc(n).unwrap().unwrap();
        let p = alloc.malloc(n).unwrap().unwrap();
        alloc.free(p.as_ptr()).unwrap();
        assert_eq!(alloc.malloc(n).unwrap(), Some(p), "n={n}");
    }
}
