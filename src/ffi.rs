//! C allocator exports (`malloc`, `free`, ...).
//!
//! Gated behind `features = ["ffi"]`. Linking the crate into a program, or
//! preloading a shared build of it, replaces the process allocator: every
//! heap block then ends (or, with `PAGEFENCE_PROTECT_BELOW=1`, starts) at a
//! revoked page. The shared object is built with
//!
//! ```text
//! cargo rustc --profile fast --features ffi --crate-type cdylib
//! LD_PRELOAD=target/fast/libpagefence.so ./program
//! ```
//!
//! `malloc`, `calloc` and `realloc` return pointers aligned like glibc's
//! (two machine words) unless the alignment is lowered. At alignment 1 a
//! trailing guard catches a one-byte overrun, but most programs will not
//! survive the unaligned pointers.
//!
//! Configuration is the exported `PAGEFENCE_SETTINGS` record, readable and
//! writable from C as
//!
//! ```c
//! extern struct {
//!     unsigned char orientation;
//!     bool enabled;
//!     size_t alignment;
//! } PAGEFENCE_SETTINGS;
//! ```
//!
//! or through `pagefence_set_protect_below`, `pagefence_set_alignment` and
//! `pagefence_set_enabled`. Environment overrides are applied once, before
//! the first allocation.

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("the `ffi` feature interposes glibc's malloc and needs a linux-gnu target");

use crate::allocator::PageFence;
use crate::config::{Orientation, Settings};
use core::ffi::{c_int, c_void};
use core::ptr;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

#[unsafe(no_mangle)]
pub static PAGEFENCE_SETTINGS: Settings = Settings::new();

static FENCE: PageFence<'static> = PageFence::system(&PAGEFENCE_SETTINGS);

const UNINIT: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

static INIT_STATE: AtomicU8 = AtomicU8::new(UNINIT);

/// Library constructor: apply the environment before `main` even if nothing
/// has allocated yet.
#[used]
#[unsafe(link_section = ".init_array")]
static CTOR: unsafe extern "C" fn() = {
    unsafe extern "C" fn init() {
        ensure_initialized();
    }
    init
};

#[inline(always)]
fn ensure_initialized() {
    if INIT_STATE.load(Ordering::Acquire) != READY {
        initialize();
    }
}

#[cold]
#[inline(never)]
fn initialize() {
    match INIT_STATE.compare_exchange(UNINIT, INITIALIZING, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {}
        Err(INITIALIZING) => {
            while INIT_STATE.load(Ordering::Acquire) == INITIALIZING {
                core::hint::spin_loop();
            }
            return;
        }
        Err(_) => return,
    }

    // getenv does not allocate, so this cannot re-enter us.
    unsafe { PAGEFENCE_SETTINGS.apply_env() };
    fence_log!(
        info,
        "interposing malloc: {} guard, alignment {}, {}",
        PAGEFENCE_SETTINGS.orientation().name(),
        PAGEFENCE_SETTINGS.alignment(),
        if PAGEFENCE_SETTINGS.enabled() { "enabled" } else { "disabled" }
    );

    INIT_STATE.store(READY, Ordering::Release);
}

#[inline]
unsafe fn set_errno(value: c_int) {
    unsafe { *libc::__errno_location() = value };
}

/// ENOMEM on a null result, as glibc does.
#[inline]
fn out_of_memory_if_null(ptr: *mut u8) -> *mut c_void {
    if ptr.is_null() {
        unsafe { set_errno(libc::ENOMEM) };
    }
    ptr as *mut c_void
}

// ============================================================================
// Configuration
// ============================================================================

/// Non-zero selects the leading guard (underrun detection).
#[unsafe(no_mangle)]
pub extern "C" fn pagefence_set_protect_below(below: c_int) {
    ensure_initialized();
    PAGEFENCE_SETTINGS.set_orientation(if below != 0 {
        Orientation::Leading
    } else {
        Orientation::Trailing
    });
}

/// Alignment of `malloc`, `calloc` and `realloc` results. Returns 0 on
/// success, `EINVAL` (setting unchanged) unless `alignment` is a power of
/// two.
#[unsafe(no_mangle)]
pub extern "C" fn pagefence_set_alignment(alignment: usize) -> c_int {
    ensure_initialized();
    if PAGEFENCE_SETTINGS.set_alignment(alignment) {
        0
    } else {
        libc::EINVAL
    }
}

/// Zero forwards every call to glibc without guard pages.
#[unsafe(no_mangle)]
pub extern "C" fn pagefence_set_enabled(enabled: c_int) {
    ensure_initialized();
    PAGEFENCE_SETTINGS.set_enabled(enabled != 0);
}

// ============================================================================
// Standard C allocator API
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    ensure_initialized();
    out_of_memory_if_null(unsafe { FENCE.malloc(size) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    ensure_initialized();
    unsafe { FENCE.free(ptr as *mut u8) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    ensure_initialized();
    let new = unsafe { FENCE.realloc(ptr as *mut u8, size) };
    // glibc's own realloc(ptr, 0) frees and returns null while disabled.
    if size == 0 && !ptr.is_null() {
        return new as *mut c_void;
    }
    out_of_memory_if_null(new)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn calloc(nmemb: usize, size: usize) -> *mut c_void {
    ensure_initialized();
    out_of_memory_if_null(unsafe { FENCE.calloc(nmemb, size) })
}

// ============================================================================
// POSIX alignment APIs
// ============================================================================

#[unsafe(no_mangle)]
pub unsafe extern "C" fn posix_memalign(
    memptr: *mut *mut c_void,
    alignment: usize,
    size: usize,
) -> c_int {
    if memptr.is_null() {
        return libc::EINVAL;
    }
    ensure_initialized();

    // POSIX: a power of two and a multiple of sizeof(void*).
    if alignment % core::mem::size_of::<*mut c_void>() != 0 || !FENCE.alignment_supported(alignment) {
        return libc::EINVAL;
    }

    let ptr = unsafe { FENCE.memalign(alignment, size) };
    if ptr.is_null() {
        return libc::ENOMEM;
    }

    unsafe { *memptr = ptr as *mut c_void };
    0
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn aligned_alloc(alignment: usize, size: usize) -> *mut c_void {
    ensure_initialized();
    if !FENCE.alignment_supported(alignment) {
        unsafe { set_errno(libc::EINVAL) };
        return ptr::null_mut();
    }
    out_of_memory_if_null(unsafe { FENCE.memalign(alignment, size) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn memalign(alignment: usize, size: usize) -> *mut c_void {
    unsafe { aligned_alloc(alignment, size) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn valloc(size: usize) -> *mut c_void {
    ensure_initialized();
    out_of_memory_if_null(unsafe { FENCE.valloc(size) })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn pvalloc(size: usize) -> *mut c_void {
    ensure_initialized();
    out_of_memory_if_null(unsafe { FENCE.pvalloc(size) })
}

// ============================================================================
// GNU extensions
// ============================================================================

type MallocUsableSizeFn = unsafe extern "C" fn(*mut c_void) -> usize;

static REAL_MALLOC_USABLE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// glibc's own `malloc_usable_size`, for blocks handed out while disabled.
unsafe fn real_malloc_usable_size(ptr: *mut c_void) -> usize {
    let mut f = REAL_MALLOC_USABLE_SIZE.load(Ordering::Acquire);
    if f == 0 {
        f = unsafe { libc::dlsym(libc::RTLD_NEXT, c"malloc_usable_size".as_ptr()) } as usize;
        if f == 0 {
            return 0;
        }
        REAL_MALLOC_USABLE_SIZE.store(f, Ordering::Release);
    }
    let f: MallocUsableSizeFn = unsafe { core::mem::transmute(f) };
    unsafe { f(ptr) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    ensure_initialized();
    match unsafe { FENCE.usable_size(ptr as *mut u8) } {
        Some(size) => size,
        None => unsafe { real_malloc_usable_size(ptr) },
    }
}
