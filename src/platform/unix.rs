//! Unix backing allocator and page protection.
//!
//! With `ffi` this crate exports `malloc` and friends itself, so calling
//! `libc::malloc` would land back in our own entry points. glibc keeps its
//! real implementation reachable under the private `__libc_*` names, and
//! those are never shadowed.

use crate::error::OsError;
use crate::platform::Access;
use core::ffi::c_void;
use core::sync::atomic::{AtomicUsize, Ordering};

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// OS page size, read from `sysconf` once.
#[inline]
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    init_page_size()
}

#[cold]
fn init_page_size() -> usize {
    let ps = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let ps = if ps > 0 { ps as usize } else { 4096 };
    PAGE_SIZE.store(ps, Ordering::Relaxed);
    ps
}

pub unsafe fn protect(addr: *mut u8, len: usize, access: Access) -> Result<(), OsError> {
    let prot = match access {
        Access::None => libc::PROT_NONE,
        Access::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
    };
    if unsafe { libc::mprotect(addr as *mut c_void, len, prot) } < 0 {
        Err(OsError::last())
    } else {
        Ok(())
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "dragonfly"))] {
        #[inline]
        pub fn last_errno() -> i32 {
            unsafe { *libc::__error() }
        }
    } else if #[cfg(any(target_os = "openbsd", target_os = "netbsd", target_os = "android"))] {
        #[inline]
        pub fn last_errno() -> i32 {
            unsafe { *libc::__errno() }
        }
    } else {
        #[inline]
        pub fn last_errno() -> i32 {
            unsafe { *libc::__errno_location() }
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "ffi")] {
        unsafe extern "C" {
            fn __libc_malloc(size: usize) -> *mut c_void;
            fn __libc_free(ptr: *mut c_void);
            fn __libc_realloc(ptr: *mut c_void, size: usize) -> *mut c_void;
            fn __libc_memalign(align: usize, size: usize) -> *mut c_void;
        }

        #[inline]
        pub unsafe fn backing_alloc(size: usize) -> *mut u8 {
            unsafe { __libc_malloc(size) as *mut u8 }
        }

        #[inline]
        pub unsafe fn backing_alloc_aligned(align: usize, size: usize) -> *mut u8 {
            unsafe { __libc_memalign(align, size) as *mut u8 }
        }

        #[inline]
        pub unsafe fn backing_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
            unsafe { __libc_realloc(ptr as *mut c_void, size) as *mut u8 }
        }

        #[inline]
        pub unsafe fn backing_free(ptr: *mut u8) {
            unsafe { __libc_free(ptr as *mut c_void) }
        }
    } else {
        #[inline]
        pub unsafe fn backing_alloc(size: usize) -> *mut u8 {
            unsafe { libc::malloc(size) as *mut u8 }
        }

        #[inline]
        pub unsafe fn backing_alloc_aligned(align: usize, size: usize) -> *mut u8 {
            let mut out: *mut c_void = core::ptr::null_mut();
            if unsafe { libc::posix_memalign(&mut out, align, size) } != 0 {
                return core::ptr::null_mut();
            }
            out as *mut u8
        }

        #[inline]
        pub unsafe fn backing_realloc(ptr: *mut u8, size: usize) -> *mut u8 {
            unsafe { libc::realloc(ptr as *mut c_void, size) as *mut u8 }
        }

        #[inline]
        pub unsafe fn backing_free(ptr: *mut u8) {
            unsafe { libc::free(ptr as *mut c_void) }
        }
    }
}
