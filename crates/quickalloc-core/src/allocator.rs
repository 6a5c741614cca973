//! Allocator instance.
//!
//! A [`QuickAlloc`] owns one arena, its size-class table and one free list
//! per class. Allocation pops the class's free list and only carves fresh
//! space from the arena when that list is empty. Freed blocks go back to the
//! list of the class they were carved for; they are never coalesced, split or
//! returned to the arena.
//!
//! All bookkeeping sits behind a single `parking_lot::Mutex`, so every
//! operation on an instance is linearizable. Pointer validation and class
//! resolution happen before any state is touched; a failed operation leaves
//! the instance exactly as it found it.

use std::ptr::NonNull;

use parking_lot::Mutex;
use serde::Serialize;

use crate::arena::Arena;
use crate::block::{BlockMap, BlockOffset, BlockState, HEADER_SIZE};
use crate::config::QuickAllocConfig;
use crate::error::{AllocError, AllocResult, InvalidPointerReason};
use crate::free_list::FreeLists;
use crate::log::{AllocatorLogLevel, AllocatorLogRecord, LifecycleLog, LogEvent};
use crate::size_class::{SizeClassTable, SteppingMethod};

/// Point-in-time counters of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorStats {
    pub pool_size: usize,
    pub alignment: usize,
    pub size_classes: usize,
    /// Bytes carved into blocks so far.
    pub carved_bytes: usize,
    /// Unallocated arena tail.
    pub remaining_bytes: usize,
    /// Blocks ever carved from the arena.
    pub issued_blocks: usize,
    /// Blocks currently handed out.
    pub live_blocks: usize,
    /// Sum of the sizes callers asked for, over live blocks.
    pub live_requested_bytes: usize,
    /// Blocks parked on free lists.
    pub free_blocks: usize,
    pub free_blocks_per_class: Vec<usize>,
    pub allocations: u64,
    pub frees: u64,
    pub free_list_hits: u64,
    pub fresh_carves: u64,
    pub reallocs_in_place: u64,
    pub reallocs_moved: u64,
    pub failed_allocations: u64,
    pub invalid_frees: u64,
    pub log_records_dropped: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    allocations: u64,
    frees: u64,
    free_list_hits: u64,
    fresh_carves: u64,
    reallocs_in_place: u64,
    reallocs_moved: u64,
    failed_allocations: u64,
    invalid_frees: u64,
}

/// Mutable state guarded by the instance lock.
#[derive(Debug)]
struct HeapState {
    free_lists: FreeLists,
    /// Payload offsets of every block ever carved.
    blocks: BlockMap,
    live_blocks: usize,
    live_requested_bytes: usize,
    counters: Counters,
    log: LifecycleLog,
}

impl HeapState {
    fn note(&mut self, event: LogEvent, carved_bytes: usize) {
        let live = self.live_blocks;
        self.log.record(event, live, carved_bytes);
    }
}

/// A validated, currently allocated block.
#[derive(Debug, Clone, Copy)]
struct LiveBlock {
    offset: BlockOffset,
    class: usize,
    requested: usize,
}

/// Pool-backed size-class allocator.
pub struct QuickAlloc {
    config: QuickAllocConfig,
    classes: SizeClassTable,
    arena: Arena,
    state: Mutex<HeapState>,
}

impl std::fmt::Debug for QuickAlloc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickAlloc")
            .field("config", &self.config)
            .field("size_classes", &self.classes.len())
            .field("arena", &self.arena)
            .finish_non_exhaustive()
    }
}

impl QuickAlloc {
    /// Creates an instance from explicit parameters.
    ///
    /// Payloads are aligned to the default alignment when `full_align` is
    /// set, otherwise to [`MIN_ALIGNMENT`](crate::block::MIN_ALIGNMENT).
    pub fn create(
        pool_size: usize,
        min_block_size: usize,
        max_block_size: usize,
        stepping: SteppingMethod,
        full_align: bool,
    ) -> AllocResult<Self> {
        Self::with_config(QuickAllocConfig::new(
            pool_size,
            min_block_size,
            max_block_size,
            stepping,
            full_align,
        ))
    }

    /// Creates an instance with the built-in defaults.
    ///
    /// The defaults are always valid, so the only possible failure is the
    /// host refusing the pool reservation.
    pub fn create_default() -> AllocResult<Self> {
        Self::with_config(QuickAllocConfig::default())
    }

    /// Creates an instance from a full configuration.
    pub fn with_config(config: QuickAllocConfig) -> AllocResult<Self> {
        config.validate()?;
        let alignment = config.effective_alignment();
        let classes = SizeClassTable::build(
            config.min_block_size,
            config.max_block_size,
            config.stepping,
            alignment,
        )?;

        // The first block starts `alignment - HEADER_SIZE` bytes in.
        let needed = (alignment - HEADER_SIZE).checked_add(classes.largest_block());
        if needed.is_none_or(|needed| needed > config.pool_size) {
            return Err(AllocError::invalid_config(format!(
                "pool_size {} cannot hold the largest size class ({} bytes at alignment {alignment})",
                config.pool_size,
                classes.largest_block()
            )));
        }

        let arena = Arena::reserve(config.pool_size, alignment)?;
        let mut state = HeapState {
            free_lists: FreeLists::new(classes.len()),
            blocks: BlockMap::new(config.pool_size, alignment),
            live_blocks: 0,
            live_requested_bytes: 0,
            counters: Counters::default(),
            log: LifecycleLog::new(config.log_capacity, config.log_level),
        };
        state.note(
            LogEvent::new(AllocatorLogLevel::Info, "create", "create", "success").details(
                format!(
                    "pool_size={} alignment={alignment} classes={} stepping={:?} max_payload={}",
                    config.pool_size,
                    classes.len(),
                    config.stepping,
                    classes.max_payload()
                ),
            ),
            0,
        );

        Ok(Self {
            config,
            classes,
            arena,
            state: Mutex::new(state),
        })
    }

    /// Tears the instance down and releases its arena.
    ///
    /// Every pointer obtained from this instance becomes dangling; using one
    /// afterwards is a caller error.
    pub fn discard(self) {
        drop(self);
    }

    /// Allocates at least `size` bytes.
    ///
    /// Returns `Ok(None)` for a zero-byte request. The returned pointer is
    /// aligned to [`alignment`](Self::alignment).
    pub fn malloc(&self, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        if size == 0 {
            let mut state = self.state.lock();
            state.note(
                LogEvent::new(AllocatorLogLevel::Trace, "malloc", "alloc_zero", "noop"),
                self.arena.carved(),
            );
            return Ok(None);
        }
        let mut state = self.state.lock();
        let class = self.resolve_class(&mut state, "malloc", size)?;
        let offset = self.allocate_locked(&mut state, "malloc", class, size)?;
        Ok(Some(self.arena.payload_ptr(offset)))
    }

    /// Allocates `count * size` zeroed bytes.
    pub fn calloc(&self, count: usize, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        let mut state = self.state.lock();
        let Some(total) = count.checked_mul(size) else {
            state.counters.failed_allocations += 1;
            state.note(
                LogEvent::new(AllocatorLogLevel::Warn, "calloc", "calloc_overflow", "denied")
                    .details(format!("count={count} size={size}")),
                self.arena.carved(),
            );
            return Err(AllocError::RequestTooLarge {
                requested: usize::MAX,
                max_payload: self.classes.max_payload(),
            });
        };
        if total == 0 {
            state.note(
                LogEvent::new(AllocatorLogLevel::Trace, "calloc", "alloc_zero", "noop"),
                self.arena.carved(),
            );
            return Ok(None);
        }
        let class = self.resolve_class(&mut state, "calloc", total)?;
        let offset = self.allocate_locked(&mut state, "calloc", class, total)?;
        self.arena.zero_payload(offset, total);
        Ok(Some(self.arena.payload_ptr(offset)))
    }

    /// Returns a block to its class's free list.
    ///
    /// Null is a no-op. Anything that is not a live block of this instance is
    /// rejected with [`AllocError::InvalidPointer`] and nothing changes.
    pub fn free(&self, ptr: *mut u8) -> AllocResult<()> {
        let mut state = self.state.lock();
        if ptr.is_null() {
            state.note(
                LogEvent::new(AllocatorLogLevel::Trace, "free", "free_null", "noop"),
                self.arena.carved(),
            );
            return Ok(());
        }
        let block = self.validate_locked(&mut state, "free", ptr as usize)?;
        self.release_locked(&mut state, block);
        state.note(
            LogEvent::new(AllocatorLogLevel::Trace, "free", "free", "success")
                .ptr(ptr as usize)
                .size(block.requested)
                .class(block.class),
            self.arena.carved(),
        );
        Ok(())
    }

    /// Resizes a block.
    ///
    /// - null `ptr`: behaves like [`malloc`](Self::malloc).
    /// - `size == 0`: frees `ptr` and returns `Ok(None)`.
    /// - same size class: returns `ptr` unchanged, no copy.
    /// - otherwise: moves to a block of the new class, copying
    ///   `min(old payload capacity, size)` bytes, and frees the old block.
    ///
    /// On failure the original block is untouched and still owned by the
    /// caller.
    pub fn realloc(&self, ptr: *mut u8, size: usize) -> AllocResult<Option<NonNull<u8>>> {
        if ptr.is_null() {
            return self.malloc(size);
        }
        if size == 0 {
            self.free(ptr)?;
            return Ok(None);
        }

        let addr = ptr as usize;
        let mut state = self.state.lock();
        let old = self.validate_locked(&mut state, "realloc", addr)?;
        let class = self.resolve_class(&mut state, "realloc", size)?;

        if class == old.class {
            self.arena.write_block(
                old.offset,
                BlockState::Allocated {
                    class,
                    requested: size,
                },
            );
            state.live_requested_bytes = state.live_requested_bytes - old.requested + size;
            state.counters.reallocs_in_place += 1;
            state.note(
                LogEvent::new(AllocatorLogLevel::Trace, "realloc", "realloc_in_place", "success")
                    .ptr(addr)
                    .size(size)
                    .class(class)
                    .details(format!("old_size={}", old.requested)),
                self.arena.carved(),
            );
            return Ok(Some(self.arena.payload_ptr(old.offset)));
        }

        let offset = match self.allocate_locked(&mut state, "realloc", class, size) {
            Ok(offset) => offset,
            Err(err) => {
                state.note(
                    LogEvent::new(AllocatorLogLevel::Warn, "realloc", "realloc_failed", err.code())
                        .ptr(addr)
                        .size(size)
                        .class(class)
                        .details("original block kept"),
                    self.arena.carved(),
                );
                return Err(err);
            }
        };
        let preserved = self.classes.payload_capacity(old.class).min(size);
        self.arena.copy_payload(old.offset, offset, preserved);
        self.release_locked(&mut state, old);
        state.counters.reallocs_moved += 1;

        let new_ptr = self.arena.payload_ptr(offset);
        state.note(
            LogEvent::new(AllocatorLogLevel::Trace, "realloc", "realloc_move", "success")
                .ptr(new_ptr.as_ptr() as usize)
                .size(size)
                .class(class)
                .details(format!(
                    "old_ptr={addr:#x} old_class={} copied={preserved}",
                    old.class
                )),
            self.arena.carved(),
        );
        Ok(Some(new_ptr))
    }

    /// Bytes the caller may actually use behind `ptr`; 0 for null.
    pub fn usable_size(&self, ptr: *const u8) -> AllocResult<usize> {
        if ptr.is_null() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        let block = self.validate_locked(&mut state, "usable_size", ptr as usize)?;
        Ok(self.classes.payload_capacity(block.class))
    }

    /// True if `ptr` is a live block of this instance.
    #[must_use]
    pub fn owns(&self, ptr: *const u8) -> bool {
        let state = self.state.lock();
        self.check_block(&state, ptr as usize).is_ok()
    }

    /// True if `ptr` satisfies this instance's payload alignment.
    #[must_use]
    pub fn is_aligned(&self, ptr: *const u8) -> bool {
        (ptr as usize) % self.alignment() == 0
    }

    /// Alignment every returned payload satisfies.
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.arena.alignment()
    }

    #[must_use]
    pub fn config(&self) -> &QuickAllocConfig {
        &self.config
    }

    #[must_use]
    pub fn size_classes(&self) -> &SizeClassTable {
        &self.classes
    }

    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            pool_size: self.arena.capacity(),
            alignment: self.alignment(),
            size_classes: self.classes.len(),
            carved_bytes: self.arena.carved(),
            remaining_bytes: self.arena.remaining(),
            issued_blocks: state.blocks.count(),
            live_blocks: state.live_blocks,
            live_requested_bytes: state.live_requested_bytes,
            free_blocks: state.free_lists.total(),
            free_blocks_per_class: state.free_lists.lengths().to_vec(),
            allocations: state.counters.allocations,
            frees: state.counters.frees,
            free_list_hits: state.counters.free_list_hits,
            fresh_carves: state.counters.fresh_carves,
            reallocs_in_place: state.counters.reallocs_in_place,
            reallocs_moved: state.counters.reallocs_moved,
            failed_allocations: state.counters.failed_allocations,
            invalid_frees: state.counters.invalid_frees,
            log_records_dropped: state.log.dropped(),
        }
    }

    /// Snapshot of the retained lifecycle records, oldest first.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.snapshot()
    }

    /// Removes and returns the retained lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.state.lock().log.drain()
    }

    fn resolve_class(
        &self,
        state: &mut HeapState,
        symbol: &'static str,
        size: usize,
    ) -> AllocResult<usize> {
        if let Some(class) = self.classes.class_for(size) {
            return Ok(class);
        }
        let max_payload = self.classes.max_payload();
        state.counters.failed_allocations += 1;
        state.note(
            LogEvent::new(AllocatorLogLevel::Warn, symbol, "request_too_large", "denied")
                .size(size)
                .details(format!("max_payload={max_payload}")),
            self.arena.carved(),
        );
        Err(AllocError::RequestTooLarge {
            requested: size,
            max_payload,
        })
    }

    /// Hands out one block of `class`, recycled if possible.
    fn allocate_locked(
        &self,
        state: &mut HeapState,
        symbol: &'static str,
        class: usize,
        requested: usize,
    ) -> AllocResult<BlockOffset> {
        let popped = match state.free_lists.pop(&self.arena, class) {
            Ok(popped) => popped,
            Err(err) => {
                state.counters.failed_allocations += 1;
                state.note(
                    LogEvent::new(AllocatorLogLevel::Error, symbol, "free_list_corrupted", "denied")
                        .size(requested)
                        .class(class)
                        .details(err.to_string()),
                    self.arena.carved(),
                );
                return Err(err);
            }
        };

        let (offset, path) = match popped {
            Some(offset) => {
                state.counters.free_list_hits += 1;
                (offset, "path=free_list_hit")
            }
            None => match self.arena.carve(self.classes.block_size(class)) {
                Ok(offset) => {
                    state.blocks.mark(offset);
                    state.counters.fresh_carves += 1;
                    (offset, "path=fresh_carve")
                }
                Err(exhausted) => {
                    state.counters.failed_allocations += 1;
                    state.note(
                        LogEvent::new(AllocatorLogLevel::Warn, symbol, "arena_exhausted", "oom")
                            .size(requested)
                            .class(class)
                            .details(format!(
                                "block_size={} remaining={}",
                                exhausted.requested, exhausted.remaining
                            )),
                        self.arena.carved(),
                    );
                    return Err(exhausted.into());
                }
            },
        };

        self.arena
            .write_block(offset, BlockState::Allocated { class, requested });
        state.live_blocks += 1;
        state.live_requested_bytes += requested;
        state.counters.allocations += 1;
        state.note(
            LogEvent::new(AllocatorLogLevel::Trace, symbol, "alloc", "success")
                .ptr(self.arena.base_addr() + offset.get())
                .size(requested)
                .class(class)
                .details(path),
            self.arena.carved(),
        );
        Ok(offset)
    }

    fn release_locked(&self, state: &mut HeapState, block: LiveBlock) {
        state
            .free_lists
            .push(&self.arena, block.class, block.offset);
        state.live_blocks -= 1;
        state.live_requested_bytes -= block.requested;
        state.counters.frees += 1;
    }

    /// Like [`check_block`](Self::check_block), but records the rejection.
    fn validate_locked(
        &self,
        state: &mut HeapState,
        symbol: &'static str,
        addr: usize,
    ) -> AllocResult<LiveBlock> {
        self.check_block(state, addr).map_err(|reason| {
            state.counters.invalid_frees += 1;
            state.note(
                LogEvent::new(AllocatorLogLevel::Warn, symbol, "invalid_free", "rejected")
                    .ptr(addr)
                    .details(reason.as_str()),
                self.arena.carved(),
            );
            AllocError::InvalidPointer { addr, reason }
        })
    }

    fn check_block(
        &self,
        state: &HeapState,
        addr: usize,
    ) -> Result<LiveBlock, InvalidPointerReason> {
        let Some(offset) = self.arena.offset_of(addr) else {
            return Err(if self.arena.contains(addr) {
                InvalidPointerReason::NotBlockStart
            } else {
                InvalidPointerReason::NotOwned
            });
        };
        if offset.get() % self.alignment() != 0 || !state.blocks.contains(offset) {
            return Err(InvalidPointerReason::NotBlockStart);
        }
        match self.arena.read_block(offset) {
            Some(BlockState::Allocated { class, requested }) if class < self.classes.len() => {
                Ok(LiveBlock {
                    offset,
                    class,
                    requested,
                })
            }
            Some(BlockState::Free { .. }) => Err(InvalidPointerReason::DoubleFree),
            _ => Err(InvalidPointerReason::Corrupted),
        }
    }
}
