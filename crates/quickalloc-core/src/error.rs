//! Allocator error taxonomy.
//!
//! Every fallible operation reports one of these kinds to its immediate
//! caller. None of them is fatal to the hosting process.

use thiserror::Error;

/// Result alias used throughout the allocator.
pub type AllocResult<T> = Result<T, AllocError>;

/// Where an out-of-memory condition originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomSource {
    /// The host refused to reserve the backing pool.
    Reservation,
    /// The arena's unallocated tail is too small for the requested class.
    ArenaExhausted,
}

/// Why a pointer handed to `free`/`realloc` was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPointerReason {
    /// Address lies outside the carved region of this instance.
    NotOwned,
    /// Address is inside the arena but not the payload start of an issued block.
    NotBlockStart,
    /// The block is already on a free list.
    DoubleFree,
    /// The block header does not decode to a known state.
    Corrupted,
}

impl InvalidPointerReason {
    /// Stable label for logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotOwned => "not_owned",
            Self::NotBlockStart => "not_block_start",
            Self::DoubleFree => "double_free",
            Self::Corrupted => "corrupted_header",
        }
    }
}

impl std::fmt::Display for InvalidPointerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Allocator failure kinds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    /// Creation parameters are unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The pool could not be reserved, or it has no room left for the class.
    #[error("out of memory ({origin:?}): requested {requested} bytes, {remaining} remaining")]
    OutOfMemory {
        requested: usize,
        remaining: usize,
        origin: OomSource,
    },

    /// The request exceeds the payload capacity of the largest size class.
    #[error("request of {requested} bytes exceeds largest payload of {max_payload} bytes")]
    RequestTooLarge { requested: usize, max_payload: usize },

    /// Foreign, misaligned, double-freed or otherwise unusable pointer.
    #[error("invalid pointer {addr:#x}: {reason}")]
    InvalidPointer {
        addr: usize,
        reason: InvalidPointerReason,
    },

    /// The global facade was used before `init` or after `destroy`.
    #[error("global allocator is not initialized")]
    NotInitialized,

    /// A free-list node failed to decode while being popped.
    #[error("free list corrupted at arena offset {offset:#x}")]
    Corrupted { offset: usize },
}

impl AllocError {
    pub(crate) fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    /// Stable kind label.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration { .. } => "invalid_configuration",
            Self::OutOfMemory { .. } => "out_of_memory",
            Self::RequestTooLarge { .. } => "request_too_large",
            Self::InvalidPointer { .. } => "invalid_pointer",
            Self::NotInitialized => "not_initialized",
            Self::Corrupted { .. } => "corrupted",
        }
    }

    /// True for failures the caller may retry (smaller request, other instance).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
