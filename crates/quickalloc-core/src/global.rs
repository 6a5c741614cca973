//! Process-wide default instance.
//!
//! `init`/`destroy` swap the slot under its write lock. Every other call
//! clones the `Arc` under the read lock and releases the lock before doing
//! any work, so an operation that already started keeps its instance alive
//! even if `destroy` runs concurrently; the arena is released when the last
//! such operation returns.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::allocator::QuickAlloc;
use crate::config::QuickAllocConfig;
use crate::error::{AllocError, AllocResult};

static GLOBAL: RwLock<Option<Arc<QuickAlloc>>> = parking_lot::const_rwlock(None);

/// Creates the default instance.
///
/// Returns `Ok(true)` if an instance was created and `Ok(false)` if one was
/// already installed; the existing instance is left untouched.
pub fn init() -> AllocResult<bool> {
    install(QuickAlloc::create_default)
}

/// Like [`init`], with an explicit configuration.
pub fn init_with(config: QuickAllocConfig) -> AllocResult<bool> {
    install(|| QuickAlloc::with_config(config))
}

fn install(build: impl FnOnce() -> AllocResult<QuickAlloc>) -> AllocResult<bool> {
    let mut slot = GLOBAL.write();
    if slot.is_some() {
        return Ok(false);
    }
    *slot = Some(Arc::new(build()?));
    Ok(true)
}

/// Drops the default instance. Returns false if none was installed.
///
/// Pointers obtained through the facade become invalid once in-flight
/// operations finish.
pub fn destroy() -> bool {
    let previous = GLOBAL.write().take();
    previous.is_some()
}

#[must_use]
pub fn is_initialized() -> bool {
    GLOBAL.read().is_some()
}

/// Handle to the default instance.
pub fn instance() -> AllocResult<Arc<QuickAlloc>> {
    GLOBAL.read().clone().ok_or(AllocError::NotInitialized)
}

pub fn quick_malloc(size: usize) -> AllocResult<Option<NonNull<u8>>> {
    instance()?.malloc(size)
}

pub fn quick_calloc(count: usize, size: usize) -> AllocResult<Option<NonNull<u8>>> {
    instance()?.calloc(count, size)
}

pub fn quick_free(ptr: *mut u8) -> AllocResult<()> {
    instance()?.free(ptr)
}

pub fn quick_realloc(ptr: *mut u8, size: usize) -> AllocResult<Option<NonNull<u8>>> {
    instance()?.realloc(ptr, size)
}

pub fn quick_usable_size(ptr: *const u8) -> AllocResult<usize> {
    instance()?.usable_size(ptr)
}

/// Payload alignment of the default instance.
pub fn alignment() -> AllocResult<usize> {
    Ok(instance()?.alignment())
}
