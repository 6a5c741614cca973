//! Fixed-capacity backing region with a bump cursor.
//!
//! The arena is reserved once, aligned to the allocator's payload alignment,
//! and never grows. Blocks are carved from its unallocated tail by advancing
//! an atomic cursor; they are never returned to the arena, only recycled
//! through free lists. All raw memory access of the allocator lives here.
//!
//! Layout: the first block starts `alignment - HEADER_SIZE` bytes in, so its
//! payload sits exactly on an alignment boundary. Every class size is a
//! multiple of the alignment, so each later payload lands on one too.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::block::{BlockOffset, BlockState, FREE_LINK_SIZE, HEADER_SIZE, MIN_ALIGNMENT, RawHeader};
use crate::error::{AllocError, AllocResult, OomSource};
use crate::size_class::round_up;

/// Carve failure: the unallocated tail cannot fit the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaExhausted {
    pub requested: usize,
    pub remaining: usize,
}

impl From<ArenaExhausted> for AllocError {
    fn from(e: ArenaExhausted) -> Self {
        AllocError::OutOfMemory {
            requested: e.requested,
            remaining: e.remaining,
            origin: OomSource::ArenaExhausted,
        }
    }
}

/// One contiguous, pre-reserved memory region.
pub struct Arena {
    base: NonNull<u8>,
    layout: Layout,
    alignment: usize,
    /// Offset of the first block's header.
    first_block: usize,
    /// Offset where the next block will start. `first_block <= cursor <= capacity`.
    cursor: AtomicUsize,
}

// SAFETY: the region is owned exclusively by this value. Raw access goes
// through bounds-checked methods; concurrent mutation of headers and links is
// serialized by the owning allocator's guard, and the cursor is atomic.
unsafe impl Send for Arena {}
// SAFETY: see above.
unsafe impl Sync for Arena {}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("base", &self.base)
            .field("capacity", &self.capacity())
            .field("alignment", &self.alignment)
            .field("cursor", &self.used())
            .finish()
    }
}

impl Arena {
    /// Reserves `capacity` zeroed bytes aligned to `alignment`.
    pub fn reserve(capacity: usize, alignment: usize) -> AllocResult<Self> {
        if capacity == 0 {
            return Err(AllocError::invalid_config("arena capacity must be non-zero"));
        }
        if !alignment.is_power_of_two() || alignment < MIN_ALIGNMENT {
            return Err(AllocError::invalid_config(format!(
                "arena alignment {alignment} must be a power of two >= {MIN_ALIGNMENT}"
            )));
        }
        let host_refused = AllocError::OutOfMemory {
            requested: capacity,
            remaining: 0,
            origin: OomSource::Reservation,
        };
        // Alignment is already checked, so a layout error means the size
        // exceeds what the host can address.
        let layout =
            Layout::from_size_align(capacity, alignment).map_err(|_| host_refused.clone())?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(host_refused)?;

        // alignment >= MIN_ALIGNMENT >= HEADER_SIZE, so this is alignment - HEADER_SIZE.
        let first_block = alignment - HEADER_SIZE;
        Ok(Self {
            base,
            layout,
            alignment,
            first_block,
            cursor: AtomicUsize::new(first_block.min(capacity)),
        })
    }

    /// Advances the cursor by one block of `block_size` bytes.
    ///
    /// The block start is rounded so that its payload is aligned. Returns the
    /// payload offset of the new block.
    pub fn carve(&self, block_size: usize) -> Result<BlockOffset, ArenaExhausted> {
        let capacity = self.capacity();
        let mut current = self.cursor.load(Ordering::Acquire);
        loop {
            let span = current
                .checked_add(HEADER_SIZE)
                .and_then(|v| round_up(v, self.alignment))
                .map(|payload| payload - HEADER_SIZE)
                .and_then(|start| Some((start, start.checked_add(block_size)?)))
                .filter(|&(_, end)| end <= capacity);
            let Some((start, end)) = span else {
                return Err(ArenaExhausted {
                    requested: block_size,
                    remaining: capacity.saturating_sub(current),
                });
            };
            match self
                .cursor
                .compare_exchange_weak(current, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(BlockOffset::new(start + HEADER_SIZE)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Maps an address to a payload offset inside the carved region.
    ///
    /// Does not check that the offset starts a block.
    #[must_use]
    pub fn offset_of(&self, addr: usize) -> Option<BlockOffset> {
        let offset = addr.checked_sub(self.base_addr())?;
        if offset < self.first_payload() || offset >= self.used() {
            return None;
        }
        Some(BlockOffset::new(offset))
    }

    /// True if `addr` lies anywhere in the reserved region.
    #[must_use]
    pub fn contains(&self, addr: usize) -> bool {
        addr.checked_sub(self.base_addr())
            .is_some_and(|offset| offset < self.capacity())
    }

    /// Pointer to the payload at `offset`.
    #[must_use]
    pub fn payload_ptr(&self, offset: BlockOffset) -> NonNull<u8> {
        debug_assert!(offset.get() < self.capacity());
        // SAFETY: issued payload offsets are below capacity, so the result
        // stays inside the reservation and is non-null.
        unsafe { self.base.add(offset.get()) }
    }

    fn addressable(&self, offset: BlockOffset) -> bool {
        let off = offset.get();
        off % MIN_ALIGNMENT == 0
            && off >= HEADER_SIZE
            && off
                .checked_add(FREE_LINK_SIZE)
                .is_some_and(|end| end <= self.capacity())
    }

    /// Reads and decodes the block at `offset`.
    ///
    /// Returns `None` for offsets that cannot hold a block or whose header
    /// does not decode.
    #[must_use]
    pub fn read_block(&self, offset: BlockOffset) -> Option<BlockState> {
        if !self.addressable(offset) {
            return None;
        }
        let base = self.base.as_ptr();
        // SAFETY: `addressable` guarantees header and link word are inside the
        // reservation and 16-byte aligned; the region is zero-initialized, so
        // every byte is initialized.
        let raw = unsafe { base.add(offset.header()).cast::<RawHeader>().read() };
        BlockState::decode(raw, || {
            // SAFETY: as above, the link word is the first payload word.
            unsafe { base.add(offset.get()).cast::<usize>().read() }
        })
    }

    /// Encodes `state` into the header (and, for free blocks, the link word).
    pub fn write_block(&self, offset: BlockOffset, state: BlockState) {
        if !self.addressable(offset) {
            debug_assert!(false, "write_block at unaddressable offset {offset:?}");
            return;
        }
        let (raw, link) = state.encode();
        let base = self.base.as_ptr();
        // SAFETY: `addressable` guarantees both words are in bounds and aligned.
        // The allocator guard serializes writers.
        unsafe {
            base.add(offset.header()).cast::<RawHeader>().write(raw);
            if let Some(link) = link {
                base.add(offset.get()).cast::<usize>().write(link);
            }
        }
    }

    /// Copies `len` payload bytes from block `src` to block `dst`.
    pub fn copy_payload(&self, src: BlockOffset, dst: BlockOffset, len: usize) {
        let capacity = self.capacity();
        let in_bounds = |o: BlockOffset| o.get().checked_add(len).is_some_and(|e| e <= capacity);
        if len == 0 || !in_bounds(src) || !in_bounds(dst) {
            debug_assert!(len == 0, "copy_payload out of bounds");
            return;
        }
        let base = self.base.as_ptr();
        // SAFETY: both ranges are inside the reservation; `ptr::copy`
        // tolerates overlap.
        unsafe { ptr::copy(base.add(src.get()), base.add(dst.get()), len) };
    }

    /// Zeroes `len` payload bytes of block `offset`.
    pub fn zero_payload(&self, offset: BlockOffset, len: usize) {
        let Some(end) = offset.get().checked_add(len) else {
            return;
        };
        if end > self.capacity() {
            debug_assert!(false, "zero_payload out of bounds");
            return;
        }
        // SAFETY: range checked against the reservation above.
        unsafe { ptr::write_bytes(self.base.as_ptr().add(offset.get()), 0, len) };
    }

    #[must_use]
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Payload offset of the first block the arena will ever carve.
    #[must_use]
    pub fn first_payload(&self) -> usize {
        self.first_block + HEADER_SIZE
    }

    /// Cursor position: bytes consumed from the start of the region.
    #[must_use]
    pub fn used(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Bytes carved into blocks so far.
    #[must_use]
    pub fn carved(&self) -> usize {
        self.used().saturating_sub(self.first_block)
    }

    /// Unallocated tail.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.used())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: `base` came from `alloc_zeroed` with exactly this layout and
        // is released only here.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
    }
}
