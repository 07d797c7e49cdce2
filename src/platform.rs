//! The two collaborators the guard engine leans on: somewhere to get raw
//! memory from, and a way to flip page permissions.
//!
//! Both are traits so the placement logic can be driven by fakes in tests.
//! [`System`] is the real thing: the process's original `malloc` family
//! plus `mprotect`.

use crate::error::OsError;

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        use unix as sys;
    } else {
        compile_error!("pagefence needs mprotect-style page protection; only unix targets are supported");
    }
}

/// Permission set applied to a guard page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Any touch faults.
    None,
    /// Ordinary heap memory.
    ReadWrite,
}

impl Access {
    pub const fn name(self) -> &'static str {
        match self {
            Access::None => "PROT_NONE",
            Access::ReadWrite => "PROT_READ|PROT_WRITE",
        }
    }
}

/// General-purpose allocator that supplies backing storage.
///
/// # Safety
/// Implementations must return either null or memory valid for reads and
/// writes of `size` bytes, aligned to at least a machine word, which stays
/// valid until passed back to `free`. When this crate interposes the C
/// allocator the implementation must not route back into it.
pub unsafe trait Backing {
    unsafe fn alloc(&self, size: usize) -> *mut u8;

    /// `align` is a power of two no smaller than a word.
    unsafe fn alloc_aligned(&self, align: usize, size: usize) -> *mut u8;

    /// Standard C `realloc` semantics.
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8;

    unsafe fn free(&self, ptr: *mut u8);
}

/// Page permission primitive.
///
/// # Safety
/// `page_size` must be the real granularity of `protect`: a power of two,
/// at least as large as the OS page.
pub unsafe trait Protect {
    fn page_size(&self) -> usize;

    /// Change the permissions of `len` bytes (a multiple of the page size)
    /// starting at the page-aligned `addr`.
    unsafe fn protect(&self, addr: *mut u8, len: usize, access: Access) -> Result<(), OsError>;
}

/// The process's own allocator and `mprotect`.
#[derive(Clone, Copy, Debug, Default)]
pub struct System;

unsafe impl Backing for System {
    #[inline]
    unsafe fn alloc(&self, size: usize) -> *mut u8 {
        unsafe { sys::backing_alloc(size) }
    }

    #[inline]
    unsafe fn alloc_aligned(&self, align: usize, size: usize) -> *mut u8 {
        unsafe { sys::backing_alloc_aligned(align, size) }
    }

    #[inline]
    unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { sys::backing_realloc(ptr, size) }
    }

    #[inline]
    unsafe fn free(&self, ptr: *mut u8) {
        unsafe { sys::backing_free(ptr) }
    }
}

unsafe impl Protect for System {
    #[inline]
    fn page_size(&self) -> usize {
        sys::page_size()
    }

    #[inline]
    unsafe fn protect(&self, addr: *mut u8, len: usize, access: Access) -> Result<(), OsError> {
        unsafe { sys::protect(addr, len, access) }
    }
}

/// Current errno of the calling thread.
#[inline]
pub fn last_errno() -> i32 {
    sys::last_errno()
}
