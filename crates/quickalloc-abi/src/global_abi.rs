//! Process-wide entry points (`quickalloc_init`, `QuickAlloc_*`).

use std::ffi::c_void;

use quickalloc_core::global;

use crate::errno::{clear, report};
use crate::into_c_ptr;

/// Installs the default instance. A second call keeps the existing one.
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_init() {
    match global::init() {
        Ok(_) => clear(),
        Err(err) => report(&err),
    }
}

/// Drops the default instance, if any.
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_destroy() {
    global::destroy();
    clear();
}

#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_malloc(size: usize) -> *mut c_void {
    into_c_ptr(global::quick_malloc(size))
}

#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_calloc(count: usize, size: usize) -> *mut c_void {
    into_c_ptr(global::quick_calloc(count, size))
}

/// Frees a block of the default instance; invalid pointers are rejected and
/// reported, never acted upon.
#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_free(ptr: *mut c_void) {
    match global::quick_free(ptr.cast()) {
        Ok(()) => clear(),
        Err(err) => report(&err),
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    into_c_ptr(global::quick_realloc(ptr.cast(), size))
}

#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_usable_size(ptr: *const c_void) -> usize {
    match global::quick_usable_size(ptr.cast()) {
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

/// Payload alignment of the default instance; 0 when none is installed.
#[unsafe(no_mangle)]
pub extern "C" fn QuickAlloc_alignment() -> usize {
    match global::alignment() {
        Ok(alignment) => alignment,
        Err(err) => {
            report(&err);
            0
        }
    }
}
