//! Explicit-instance entry points (`quickalloc_*`).
//!
//! Instances cross the boundary as an opaque `quickalloc_s*` that owns a
//! boxed [`QuickAlloc`]. A null handle is reported as
//! `QUICKALLOC_E_NOT_INITIALIZED`.

use std::ffi::c_void;

use quickalloc_core::{AllocError, QuickAlloc, QuickAllocConfig, SteppingMethod};

use crate::errno::{clear, report};
use crate::into_c_ptr;

/// Opaque C handle type.
#[allow(non_camel_case_types)]
pub type quickalloc_s = QuickAlloc;

fn publish(result: Result<QuickAlloc, AllocError>) -> *mut quickalloc_s {
    match result {
        Ok(alloc) => {
            clear();
            Box::into_raw(Box::new(alloc))
        }
        Err(err) => {
            report(&err);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
///
/// `o` must be null or a live handle from `quickalloc_create*`.
unsafe fn handle<'a>(o: *mut quickalloc_s) -> Result<&'a QuickAlloc, AllocError> {
    // SAFETY: caller contract.
    unsafe { o.as_ref() }.ok_or(AllocError::NotInitialized)
}

/// Creates an instance with the built-in defaults. Null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_create_default() -> *mut quickalloc_s {
    publish(QuickAlloc::create_default())
}

/// Creates an instance. `stepping_method` is 0 (linear) or 1 (geometric).
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_create(
    pool_size: usize,
    min_block_size: usize,
    max_block_size: usize,
    stepping_method: usize,
    full_align: bool,
) -> *mut quickalloc_s {
    let Some(stepping) = SteppingMethod::from_raw(stepping_method) else {
        report(&AllocError::InvalidConfiguration {
            reason: format!("unknown stepping method {stepping_method}"),
        });
        return std::ptr::null_mut();
    };
    publish(QuickAlloc::with_config(QuickAllocConfig::new(
        pool_size,
        min_block_size,
        max_block_size,
        stepping,
        full_align,
    )))
}

/// Releases an instance and its arena. Null is ignored.
///
/// # Safety
///
/// `o` must be null or a live handle, and must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_discard(o: *mut quickalloc_s) {
    if o.is_null() {
        return;
    }
    // SAFETY: handle came from `Box::into_raw` in `publish`.
    let alloc = unsafe { Box::from_raw(o) };
    alloc.discard();
}

/// # Safety
///
/// `o` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_malloc(o: *mut quickalloc_s, size: usize) -> *mut c_void {
    // SAFETY: caller contract.
    into_c_ptr(unsafe { handle(o) }.and_then(|alloc| alloc.malloc(size)))
}

/// # Safety
///
/// `o` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_calloc(
    o: *mut quickalloc_s,
    count: usize,
    size: usize,
) -> *mut c_void {
    // SAFETY: caller contract.
    into_c_ptr(unsafe { handle(o) }.and_then(|alloc| alloc.calloc(count, size)))
}

/// # Safety
///
/// `o` must be null or a live handle. `ptr` is validated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_realloc(
    o: *mut quickalloc_s,
    ptr: *mut c_void,
    size: usize,
) -> *mut c_void {
    // SAFETY: caller contract.
    into_c_ptr(unsafe { handle(o) }.and_then(|alloc| alloc.realloc(ptr.cast(), size)))
}

/// # Safety
///
/// `o` must be null or a live handle. `ptr` is validated.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_free(o: *mut quickalloc_s, ptr: *mut c_void) {
    // SAFETY: caller contract.
    match unsafe { handle(o) }.and_then(|alloc| alloc.free(ptr.cast())) {
        Ok(()) => clear(),
        Err(err) => report(&err),
    }
}

/// Payload bytes usable behind `ptr`; 0 for null or on error.
///
/// # Safety
///
/// `o` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_usable_size(
    o: *mut quickalloc_s,
    ptr: *const c_void,
) -> usize {
    // SAFETY: caller contract.
    match unsafe { handle(o) }.and_then(|alloc| alloc.usable_size(ptr.cast())) {
        Ok(size) => {
            clear();
            size
        }
        Err(err) => {
            report(&err);
            0
        }
    }
}

/// Payload alignment of the instance; 0 for a null handle.
///
/// # Safety
///
/// `o` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_alignment(o: *mut quickalloc_s) -> usize {
    // SAFETY: caller contract.
    match unsafe { handle(o) } {
        Ok(alloc) => alloc.alignment(),
        Err(err) => {
            report(&err);
            0
        }
    }
}

/// True if `ptr` is a live block of the instance.
///
/// # Safety
///
/// `o` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn quickalloc_owns(o: *mut quickalloc_s, ptr: *const c_void) -> bool {
    // SAFETY: caller contract.
    unsafe { handle(o) }.is_ok_and(|alloc| alloc.owns(ptr.cast()))
}
