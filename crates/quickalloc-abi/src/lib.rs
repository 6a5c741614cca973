//! # quickalloc-abi
//!
//! `extern "C"` surface of QuickAlloc, matching `include/quickalloc_manager.h`.
//!
//! ```text
//! C caller -> ABI entry (this crate) -> quickalloc-core -> return
//! ```
//!
//! Every failure returns null (or 0 / no-op), sets `errno`, and records a
//! QuickAlloc error code readable with `quickalloc_last_error`. Pointers
//! handed to `free`/`realloc` are validated by the owning instance; a bad
//! pointer is reported, never dereferenced.

#![allow(non_snake_case)]

pub mod errno;
pub mod global_abi;
pub mod instance_abi;

use std::ffi::c_void;
use std::ptr::NonNull;

use quickalloc_core::AllocResult;

/// Converts an allocation result into a C pointer, reporting failures.
pub(crate) fn into_c_ptr(result: AllocResult<Option<NonNull<u8>>>) -> *mut c_void {
    match result {
        Ok(ptr) => {
            errno::clear();
            ptr.map_or(std::ptr::null_mut(), |p| p.as_ptr().cast())
        }
        Err(err) => {
            errno::report(&err);
            std::ptr::null_mut()
        }
    }
}
