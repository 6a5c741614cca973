//! Seeded concurrent workload against one allocator instance.
//!
//! Each worker owns a fixed set of slots and drives them through a
//! deterministic (per seed) mix of malloc, realloc and free. Every live
//! block carries a per-slot byte pattern; the pattern is verified before each
//! realloc and free, so lost or overlapping blocks show up as violations.
//! After the workers join, the union of all live pointers must be distinct.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use serde::Serialize;

use quickalloc_core::{AllocError, AllocatorStats, QuickAlloc, QuickAllocConfig};

use crate::HarnessError;

const SLOTS_PER_THREAD: usize = 64;
const MAX_REPORTED_VIOLATIONS: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StressOptions {
    pub threads: usize,
    pub iterations: usize,
    /// Largest request size; clamped to the instance's largest payload.
    pub max_size: usize,
    pub seed: u64,
}

impl Default for StressOptions {
    fn default() -> Self {
        Self {
            threads: 4,
            iterations: 10_000,
            max_size: 4096,
            seed: 0x5EED,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    pub mallocs: u64,
    pub reallocs: u64,
    pub reallocs_in_place: u64,
    pub frees: u64,
    pub out_of_memory: u64,
}

impl OperationCounts {
    fn absorb(&mut self, other: &Self) {
        self.mallocs += other.mallocs;
        self.reallocs += other.reallocs;
        self.reallocs_in_place += other.reallocs_in_place;
        self.frees += other.frees;
        self.out_of_memory += other.out_of_memory;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StressReport {
    pub options: StressOptions,
    pub effective_max_size: usize,
    pub alignment: usize,
    pub operations: OperationCounts,
    pub live_at_join: usize,
    pub violation_count: usize,
    /// First few violations, in discovery order.
    pub violations: Vec<String>,
    pub passed: bool,
    pub elapsed_micros: u64,
    /// Instance counters after all blocks were released.
    pub final_stats: AllocatorStats,
}

impl StressReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        // Zero is a fixed point of xorshift.
        Self {
            state: seed.max(1),
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    ptr: NonNull<u8>,
    len: usize,
    tag: u8,
}

#[derive(Debug, Default)]
struct WorkerOutcome {
    counts: OperationCounts,
    violations: Vec<String>,
    live: Vec<usize>,
}

impl WorkerOutcome {
    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }
}

/// Runs the workload on a fresh instance built from `config`.
///
/// Returns the report and the instance so callers can export its lifecycle
/// log.
pub fn run_stress(
    config: QuickAllocConfig,
    options: StressOptions,
) -> Result<(StressReport, Arc<QuickAlloc>), HarnessError> {
    if options.threads == 0 {
        return Err(HarnessError::InvalidOption("threads must be at least 1".into()));
    }
    if options.max_size == 0 {
        return Err(HarnessError::InvalidOption("max-size must be at least 1".into()));
    }

    let alloc = Arc::new(QuickAlloc::with_config(config)?);
    let max_size = options.max_size.min(alloc.size_classes().max_payload());
    let started = Instant::now();

    let handles: Vec<_> = (0..options.threads)
        .map(|thread_index| {
            let alloc = Arc::clone(&alloc);
            let seed = options
                .seed
                .wrapping_add((thread_index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
            std::thread::spawn(move || {
                run_worker(&alloc, thread_index, seed, options.iterations, max_size)
            })
        })
        .collect();

    let mut counts = OperationCounts::default();
    let mut violations = Vec::new();
    let mut live = Vec::new();
    for (thread, handle) in handles.into_iter().enumerate() {
        let outcome = join_worker(thread, handle)?;
        counts.absorb(&outcome.counts);
        violations.extend(outcome.violations);
        live.extend(outcome.live);
    }
    let elapsed_micros = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);

    let mut seen = HashSet::with_capacity(live.len());
    for &addr in &live {
        if !seen.insert(addr) {
            violations.push(format!("pointer {addr:#x} live in two slots"));
        }
    }
    let live_at_join = live.len();
    let live_blocks = alloc.stats().live_blocks;
    if live_blocks != live_at_join {
        violations.push(format!(
            "instance reports {live_blocks} live blocks, workers hold {live_at_join}"
        ));
    }
    for addr in live {
        if let Err(err) = alloc.free(addr as *mut u8) {
            violations.push(format!("final free of {addr:#x}: {err}"));
        }
    }

    let violation_count = violations.len();
    violations.truncate(MAX_REPORTED_VIOLATIONS);
    let report = StressReport {
        options,
        effective_max_size: max_size,
        alignment: alloc.alignment(),
        operations: counts,
        live_at_join,
        violation_count,
        violations,
        passed: violation_count == 0,
        elapsed_micros,
        final_stats: alloc.stats(),
    };
    Ok((report, alloc))
}

fn join_worker(
    thread: usize,
    handle: JoinHandle<WorkerOutcome>,
) -> Result<WorkerOutcome, HarnessError> {
    handle
        .join()
        .map_err(|_| HarnessError::WorkerPanicked { thread })
}

fn run_worker(
    alloc: &QuickAlloc,
    thread_index: usize,
    seed: u64,
    iterations: usize,
    max_size: usize,
) -> WorkerOutcome {
    let mut rng = XorShift64::new(seed);
    let mut slots: Vec<Option<Slot>> = vec![None; SLOTS_PER_THREAD];
    let mut out = WorkerOutcome::default();
    let alignment = alloc.alignment();

    for step in 0..iterations {
        let idx = rng.below(SLOTS_PER_THREAD);
        let size = 1 + rng.below(max_size);
        let tag = (thread_index as u8).wrapping_mul(31) ^ (idx as u8) ^ (step as u8);
        let op = rng.below(100);

        match (slots[idx], op) {
            (None, _) => match alloc.malloc(size) {
                Ok(Some(ptr)) => {
                    out.counts.mallocs += 1;
                    if ptr.as_ptr() as usize % alignment != 0 {
                        out.violation(format!("t{thread_index} step {step}: misaligned {ptr:p}"));
                    }
                    pattern::fill(ptr, size, tag);
                    slots[idx] = Some(Slot { ptr, len: size, tag });
                }
                Ok(None) => out.violation(format!("t{thread_index} step {step}: null for {size}")),
                Err(AllocError::OutOfMemory { .. }) => out.counts.out_of_memory += 1,
                Err(err) => out.violation(format!("t{thread_index} step {step}: malloc: {err}")),
            },
            (Some(slot), 0..=49) => {
                if !pattern::verify(slot.ptr, slot.len, slot.tag) {
                    out.violation(format!(
                        "t{thread_index} step {step}: block {:p} clobbered before realloc",
                        slot.ptr
                    ));
                }
                match alloc.realloc(slot.ptr.as_ptr(), size) {
                    Ok(Some(ptr)) => {
                        out.counts.reallocs += 1;
                        if ptr == slot.ptr {
                            out.counts.reallocs_in_place += 1;
                        }
                        if ptr.as_ptr() as usize % alignment != 0 {
                            out.violation(format!(
                                "t{thread_index} step {step}: realloc misaligned {ptr:p}"
                            ));
                        }
                        if !pattern::verify(ptr, slot.len.min(size), slot.tag) {
                            out.violation(format!(
                                "t{thread_index} step {step}: realloc lost bytes ({} -> {size})",
                                slot.len
                            ));
                        }
                        pattern::fill(ptr, size, tag);
                        slots[idx] = Some(Slot { ptr, len: size, tag });
                    }
                    Ok(None) => out.violation(format!(
                        "t{thread_index} step {step}: realloc returned null for {size}"
                    )),
                    Err(AllocError::OutOfMemory { .. }) => out.counts.out_of_memory += 1,
                    Err(err) => {
                        out.violation(format!("t{thread_index} step {step}: realloc: {err}"));
                    }
                }
            }
            (Some(slot), _) => {
                if !pattern::verify(slot.ptr, slot.len, slot.tag) {
                    out.violation(format!(
                        "t{thread_index} step {step}: block {:p} clobbered before free",
                        slot.ptr
                    ));
                }
                match alloc.free(slot.ptr.as_ptr()) {
                    Ok(()) => {
                        out.counts.frees += 1;
                        slots[idx] = None;
                    }
                    Err(err) => out.violation(format!("t{thread_index} step {step}: free: {err}")),
                }
            }
        }
    }

    out.live = slots
        .into_iter()
        .flatten()
        .map(|slot| slot.ptr.as_ptr() as usize)
        .collect();
    out
}

#[allow(unsafe_code)]
mod pattern {
    use std::ptr::NonNull;

    fn byte(tag: u8, i: usize) -> u8 {
        tag.wrapping_add((i as u8).wrapping_mul(7))
    }

    pub(super) fn fill(ptr: NonNull<u8>, len: usize, tag: u8) {
        // SAFETY: `ptr` is a live block of at least `len` bytes owned by the
        // calling worker.
        let bytes = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) };
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = byte(tag, i);
        }
    }

    pub(super) fn verify(ptr: NonNull<u8>, len: usize, tag: u8) -> bool {
        // SAFETY: as in `fill`.
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), len) };
        bytes.iter().enumerate().all(|(i, &b)| b == byte(tag, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickalloc_core::SteppingMethod;

    #[test]
    fn test_single_thread_run_passes() {
        let config = QuickAllocConfig::new(4 << 20, 64, 2048, SteppingMethod::Linear, true);
        let options = StressOptions {
            threads: 1,
            iterations: 2_000,
            max_size: 2048,
            seed: 1,
        };
        let (report, _) = run_stress(config, options).unwrap();
        assert!(report.passed, "{:?}", report.violations);
        assert_eq!(report.final_stats.live_blocks, 0);
        assert_eq!(report.alignment, 256);
        assert!(report.operations.mallocs > 0);
    }

    #[test]
    fn test_max_size_is_clamped() {
        let config = QuickAllocConfig::new(1 << 20, 64, 512, SteppingMethod::Geometric, false);
        let options = StressOptions {
            threads: 2,
            iterations: 500,
            max_size: 1 << 20,
            seed: 9,
        };
        let (report, alloc) = run_stress(config, options).unwrap();
        assert_eq!(report.effective_max_size, alloc.size_classes().max_payload());
        assert!(report.passed, "{:?}", report.violations);
    }

    #[test]
    fn test_worker_panic_is_reported_with_thread_index() {
        let handle = std::thread::spawn(|| -> WorkerOutcome { panic!("worker failure") });
        assert!(matches!(
            join_worker(3, handle),
            Err(HarnessError::WorkerPanicked { thread: 3 })
        ));

        let handle = std::thread::spawn(WorkerOutcome::default);
        assert!(join_worker(0, handle).is_ok());
    }

    #[test]
    fn test_rejects_zero_threads() {
        let options = StressOptions {
            threads: 0,
            ..StressOptions::default()
        };
        assert!(matches!(
            run_stress(QuickAllocConfig::default(), options),
            Err(HarnessError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_tiny_pool_counts_oom_without_violations() {
        let config = QuickAllocConfig::new(16 * 1024, 256, 1024, SteppingMethod::Linear, true);
        let options = StressOptions {
            threads: 2,
            iterations: 2_000,
            max_size: 1024,
            seed: 77,
        };
        let (report, _) = run_stress(config, options).unwrap();
        assert!(report.operations.out_of_memory > 0);
        assert!(report.passed, "{:?}", report.violations);
    }
}
