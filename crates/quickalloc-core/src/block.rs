//! Block header, block handle and the issued-block map.
//!
//! Every block is `[header | payload]`. The header sits directly before the
//! payload pointer handed to callers and records which size class the block
//! belongs to and whether it is allocated or on a free list. A free block
//! keeps its free-list link in the first word of its own payload, so the two
//! states share storage and are modelled as one sum type, [`BlockState`].

/// Bytes reserved in front of every payload.
pub const HEADER_SIZE: usize = 16;

/// Smallest alignment any payload is guaranteed to have.
pub const MIN_ALIGNMENT: usize = 16;

/// Bytes of payload a free block uses for its free-list link.
pub const FREE_LINK_SIZE: usize = core::mem::size_of::<usize>();

const TAG_ALLOCATED: u32 = 0x51A1_A10C;
const TAG_FREE: u32 = 0x51A1_F4EE;

/// Free-list terminator stored in the link word.
const LINK_NONE: usize = usize::MAX;

const _: () = assert!(core::mem::size_of::<RawHeader>() <= HEADER_SIZE);
const _: () = assert!(HEADER_SIZE % MIN_ALIGNMENT == 0);

/// Arena-relative offset of a block's payload.
///
/// This is the handle the allocator passes around instead of raw addresses;
/// it only becomes a pointer at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockOffset(usize);

impl BlockOffset {
    #[must_use]
    pub const fn new(payload_offset: usize) -> Self {
        Self(payload_offset)
    }

    /// Offset of the payload from the arena base.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }

    /// Offset of the header from the arena base.
    #[must_use]
    pub const fn header(self) -> usize {
        self.0 - HEADER_SIZE
    }
}

/// In-memory header layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub(crate) tag: u32,
    pub(crate) class: u32,
    pub(crate) requested: usize,
}

/// Decoded state of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    /// Handed out to a caller, who asked for `requested` payload bytes.
    Allocated { class: usize, requested: usize },
    /// Parked on the free list of `class`; `next` is the following node.
    Free {
        class: usize,
        next: Option<BlockOffset>,
    },
}

impl BlockState {
    /// Size class the block belongs to, whatever its state.
    #[must_use]
    pub const fn class(self) -> usize {
        match self {
            Self::Allocated { class, .. } | Self::Free { class, .. } => class,
        }
    }

    #[must_use]
    pub const fn is_allocated(self) -> bool {
        matches!(self, Self::Allocated { .. })
    }

    /// Split into the header word and, for free blocks, the link word.
    pub(crate) fn encode(self) -> (RawHeader, Option<usize>) {
        match self {
            Self::Allocated { class, requested } => (
                RawHeader {
                    tag: TAG_ALLOCATED,
                    class: class as u32,
                    requested,
                },
                None,
            ),
            Self::Free { class, next } => (
                RawHeader {
                    tag: TAG_FREE,
                    class: class as u32,
                    requested: 0,
                },
                Some(next.map_or(LINK_NONE, BlockOffset::get)),
            ),
        }
    }

    /// Rebuild the state from a header; `link` is only consulted for free blocks.
    ///
    /// Returns `None` when the tag is neither of the known values.
    pub(crate) fn decode(raw: RawHeader, link: impl FnOnce() -> usize) -> Option<Self> {
        match raw.tag {
            TAG_ALLOCATED => Some(Self::Allocated {
                class: raw.class as usize,
                requested: raw.requested,
            }),
            TAG_FREE => {
                let next = match link() {
                    LINK_NONE => None,
                    offset => Some(BlockOffset::new(offset)),
                };
                Some(Self::Free {
                    class: raw.class as usize,
                    next,
                })
            }
            _ => None,
        }
    }
}

/// Bitmap of payload offsets that start an issued block.
///
/// One bit per granule of arena space. A pointer handed back by a caller is
/// only trusted as a block boundary if its bit is set; bits are never cleared
/// because blocks persist until the owning instance is discarded.
#[derive(Debug, Clone)]
pub struct BlockMap {
    words: Vec<u64>,
    granule_shift: u32,
}

impl BlockMap {
    /// Map covering `capacity` bytes at `granule` resolution (power of two).
    #[must_use]
    pub fn new(capacity: usize, granule: usize) -> Self {
        debug_assert!(granule.is_power_of_two());
        let slots = capacity / granule + 1;
        Self {
            words: vec![0; slots.div_ceil(64)],
            granule_shift: granule.trailing_zeros(),
        }
    }

    fn slot(&self, offset: BlockOffset) -> Option<(usize, u64)> {
        let slot = offset.get() >> self.granule_shift;
        let word = slot / 64;
        (word < self.words.len()).then(|| (word, 1_u64 << (slot % 64)))
    }

    /// Record a freshly carved block.
    pub fn mark(&mut self, offset: BlockOffset) {
        if let Some((word, bit)) = self.slot(offset) {
            self.words[word] |= bit;
        }
    }

    /// True if `offset` is the payload start of an issued block.
    ///
    /// Callers must pass a granule-aligned offset; unaligned offsets alias
    /// the slot below them.
    #[must_use]
    pub fn contains(&self, offset: BlockOffset) -> bool {
        self.slot(offset)
            .is_some_and(|(word, bit)| self.words[word] & bit != 0)
    }

    /// Number of issued blocks.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}
