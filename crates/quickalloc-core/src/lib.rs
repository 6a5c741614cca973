//! # quickalloc-core
//!
//! Pool-backed, size-class memory allocator with a configurable payload
//! alignment (256 bytes by default).
//!
//! An instance reserves one fixed arena up front, derives a table of size
//! classes from `(min_block_size, max_block_size, stepping)`, and serves
//! each request from the smallest class that fits, recycling freed blocks
//! through per-class free lists. A process-wide default instance is available
//! through the [`global`] facade.
//!
//! Raw memory access is confined to [`arena`]; everything else is safe code.

#![deny(unsafe_code)]

pub mod allocator;
#[allow(unsafe_code)]
pub mod arena;
pub mod block;
pub mod config;
pub mod error;
pub mod free_list;
pub mod global;
pub mod log;
pub mod size_class;

pub use allocator::{AllocatorStats, QuickAlloc};
pub use config::QuickAllocConfig;
pub use error::{AllocError, AllocResult, InvalidPointerReason, OomSource};
pub use log::{AllocatorLogLevel, AllocatorLogRecord};
pub use size_class::{SizeClass, SizeClassTable, SteppingMethod};
