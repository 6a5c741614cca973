//! Error reporting across the C boundary.
//!
//! Failures surface as a null/zero return plus two side channels: the
//! platform `errno`, and a per-thread QuickAlloc error code that keeps the
//! distinction `errno` cannot express (too-large vs. exhausted, double free
//! vs. foreign pointer, ...).

use std::cell::Cell;
use std::ffi::{c_char, c_int};

use quickalloc_core::{AllocError, InvalidPointerReason};

pub const QUICKALLOC_OK: c_int = 0;
pub const QUICKALLOC_E_INVALID_CONFIGURATION: c_int = 1;
pub const QUICKALLOC_E_OUT_OF_MEMORY: c_int = 2;
pub const QUICKALLOC_E_REQUEST_TOO_LARGE: c_int = 3;
pub const QUICKALLOC_E_INVALID_POINTER: c_int = 4;
pub const QUICKALLOC_E_DOUBLE_FREE: c_int = 5;
pub const QUICKALLOC_E_NOT_INITIALIZED: c_int = 6;
pub const QUICKALLOC_E_CORRUPTED: c_int = 7;

thread_local! {
    static LAST_ERROR: Cell<c_int> = const { Cell::new(QUICKALLOC_OK) };
}

/// QuickAlloc error code for `err`.
#[must_use]
pub fn code_for(err: &AllocError) -> c_int {
    match err {
        AllocError::InvalidConfiguration { .. } => QUICKALLOC_E_INVALID_CONFIGURATION,
        AllocError::OutOfMemory { .. } => QUICKALLOC_E_OUT_OF_MEMORY,
        AllocError::RequestTooLarge { .. } => QUICKALLOC_E_REQUEST_TOO_LARGE,
        AllocError::InvalidPointer {
            reason: InvalidPointerReason::DoubleFree,
            ..
        } => QUICKALLOC_E_DOUBLE_FREE,
        AllocError::InvalidPointer { .. } => QUICKALLOC_E_INVALID_POINTER,
        AllocError::NotInitialized => QUICKALLOC_E_NOT_INITIALIZED,
        AllocError::Corrupted { .. } => QUICKALLOC_E_CORRUPTED,
    }
}

/// POSIX errno value for `err`.
#[must_use]
pub fn errno_for(err: &AllocError) -> c_int {
    match err {
        AllocError::OutOfMemory { .. } | AllocError::RequestTooLarge { .. } => libc::ENOMEM,
        AllocError::NotInitialized => libc::EPERM,
        AllocError::InvalidConfiguration { .. }
        | AllocError::InvalidPointer { .. }
        | AllocError::Corrupted { .. } => libc::EINVAL,
    }
}

/// Records `err` in both side channels.
pub(crate) fn report(err: &AllocError) {
    set_errno(errno_for(err));
    LAST_ERROR.with(|last| last.set(code_for(err)));
}

/// Marks the calling thread's last operation as successful. `errno` is left
/// alone, as POSIX functions do on success.
pub(crate) fn clear() {
    LAST_ERROR.with(|last| last.set(QUICKALLOC_OK));
}

#[must_use]
pub fn last_error() -> c_int {
    LAST_ERROR.with(Cell::get)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_errno(value: c_int) {
    // SAFETY: `__errno_location` returns this thread's errno slot.
    unsafe { *libc::__errno_location() = value };
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn set_errno(value: c_int) {
    // SAFETY: `__error` returns this thread's errno slot.
    unsafe { *libc::__error() = value };
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn set_errno(_value: c_int) {}

/// Static description of a QuickAlloc error code.
#[must_use]
pub fn describe(code: c_int) -> &'static std::ffi::CStr {
    match code {
        QUICKALLOC_OK => c"success",
        QUICKALLOC_E_INVALID_CONFIGURATION => c"invalid configuration",
        QUICKALLOC_E_OUT_OF_MEMORY => c"out of memory",
        QUICKALLOC_E_REQUEST_TOO_LARGE => c"request exceeds largest size class",
        QUICKALLOC_E_INVALID_POINTER => c"invalid pointer",
        QUICKALLOC_E_DOUBLE_FREE => c"double free",
        QUICKALLOC_E_NOT_INITIALIZED => c"allocator not initialized",
        QUICKALLOC_E_CORRUPTED => c"free list corrupted",
        _ => c"unknown error",
    }
}

/// Last QuickAlloc error code on the calling thread.
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_last_error() -> c_int {
    last_error()
}

/// Static, NUL-terminated description of `code`.
#[unsafe(no_mangle)]
pub extern "C" fn quickalloc_strerror(code: c_int) -> *const c_char {
    describe(code).as_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickalloc_core::OomSource;

    #[test]
    fn test_errno_mapping() {
        let oom = AllocError::OutOfMemory {
            requested: 1,
            remaining: 0,
            origin: OomSource::ArenaExhausted,
        };
        assert_eq!(errno_for(&oom), libc::ENOMEM);
        assert_eq!(errno_for(&AllocError::NotInitialized), libc::EPERM);
        assert_eq!(
            errno_for(&AllocError::Corrupted { offset: 0 }),
            libc::EINVAL
        );
    }

    #[test]
    fn test_double_free_has_own_code() {
        let double = AllocError::InvalidPointer {
            addr: 0x10,
            reason: InvalidPointerReason::DoubleFree,
        };
        let foreign = AllocError::InvalidPointer {
            addr: 0x10,
            reason: InvalidPointerReason::NotOwned,
        };
        assert_eq!(code_for(&double), QUICKALLOC_E_DOUBLE_FREE);
        assert_eq!(code_for(&foreign), QUICKALLOC_E_INVALID_POINTER);
    }

    #[test]
    fn test_report_and_clear() {
        report(&AllocError::NotInitialized);
        assert_eq!(last_error(), QUICKALLOC_E_NOT_INITIALIZED);
        clear();
        assert_eq!(last_error(), QUICKALLOC_OK);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(describe(QUICKALLOC_E_DOUBLE_FREE).to_str().unwrap(), "double free");
        assert_eq!(describe(99).to_str().unwrap(), "unknown error");
    }
}
