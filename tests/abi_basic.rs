//! C allocator API semantics, exercised through the exported symbols.
//!
//! Linking with `ffi` interposes the process allocator, so this binary (the
//! test harness included) runs entirely on guarded blocks. Settings are left
//! at their defaults; nothing here toggles them.

#![cfg(feature = "ffi")]

use pagefence::ffi;
use std::collections::HashSet;
use std::ffi::c_void;
use std::ptr;

fn page() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// What glibc promises for `malloc` results, and what the harness's own
/// SSE loads rely on.
const MALLOC_ALIGN: usize = 2 * std::mem::size_of::<usize>();

fn rounded(size: usize) -> usize {
    (size + MALLOC_ALIGN - 1) & !(MALLOC_ALIGN - 1)
}

fn errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

fn clear_errno() {
    unsafe { *libc::__errno_location() = 0 };
}

#[test]
fn malloc_zero_returns_unique_pointers() {
    unsafe {
        let mut ptrs = Vec::new();
        for _ in 0..32 {
            let p = ffi::malloc(0);
            assert!(!p.is_null(), "malloc(0) must return non-NULL");
            ptrs.push(p);
        }
        let unique: HashSet<usize> = ptrs.iter().map(|p| *p as usize).collect();
        assert_eq!(unique.len(), ptrs.len(), "malloc(0) must return unique pointers");
        for p in ptrs {
            ffi::free(p);
        }
    }
}

#[test]
fn free_null_is_noop() {
    unsafe { ffi::free(ptr::null_mut()) };
}

#[test]
fn realloc_null_acts_as_malloc() {
    unsafe {
        let p = ffi::realloc(ptr::null_mut(), 128);
        assert!(!p.is_null());
        assert_eq!(ffi::malloc_usable_size(p), 128);
        ffi::free(p);
    }
}

#[test]
fn realloc_moves_and_preserves() {
    unsafe {
        let p = ffi::malloc(40) as *mut u8;
        for i in 0..40 {
            *p.add(i) = i as u8;
        }
        let q = ffi::realloc(p as *mut c_void, 4000) as *mut u8;
        assert!(!q.is_null());
        assert_ne!(p, q);
        for i in 0..40 {
            assert_eq!(*q.add(i), i as u8);
        }
        let r = ffi::realloc(q as *mut c_void, 8) as *mut u8;
        for i in 0..8 {
            assert_eq!(*r.add(i), i as u8);
        }
        assert_eq!(ffi::malloc_usable_size(r as *mut c_void), rounded(8));
        ffi::free(r as *mut c_void);
    }
}

#[test]
fn calloc_returns_zeroed_memory() {
    unsafe {
        let p = ffi::calloc(25, 7) as *mut u8;
        assert!(!p.is_null());
        assert!((0..175).all(|i| *p.add(i) == 0));
        ffi::free(p as *mut c_void);
    }
}

#[test]
fn calloc_overflow_returns_null() {
    unsafe {
        let p = ffi::calloc(usize::MAX, 2);
        assert!(p.is_null());
        assert_eq!(errno(), libc::ENOMEM);
    }
}

#[test]
fn malloc_family_returns_malloc_alignment() {
    unsafe {
        for size in [1, 12, 13, 20, 64, 1000, 5000] {
            let p = ffi::malloc(size);
            assert!(!p.is_null());
            assert_eq!(p as usize % MALLOC_ALIGN, 0, "malloc({size}) = {p:p}");
            assert_eq!(ffi::malloc_usable_size(p), rounded(size));
            // The guard page starts right after the rounded size.
            assert_eq!((p as usize + rounded(size)) % page(), 0);

            let q = ffi::realloc(p, size + 3);
            assert_eq!(q as usize % MALLOC_ALIGN, 0, "realloc to {}", size + 3);
            ffi::free(q);

            let c = ffi::calloc(1, size);
            assert_eq!(c as usize % MALLOC_ALIGN, 0, "calloc(1, {size})");
            ffi::free(c);
        }
        assert_eq!(ffi::malloc_usable_size(ptr::null_mut()), 0);
    }
}

#[test]
fn null_results_set_enomem() {
    unsafe {
        clear_errno();
        assert!(ffi::malloc(usize::MAX).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        let p = ffi::malloc(16);
        clear_errno();
        assert!(ffi::realloc(p, usize::MAX - 64).is_null());
        assert_eq!(errno(), libc::ENOMEM);
        ffi::free(p);

        clear_errno();
        assert!(ffi::aligned_alloc(64, usize::MAX - 64).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        clear_errno();
        assert!(ffi::memalign(16, usize::MAX - 64).is_null());
        assert_eq!(errno(), libc::ENOMEM);

        clear_errno();
        assert!(ffi::valloc(usize::MAX - 64).is_null());
        assert_eq!(errno(), libc::ENOMEM);
    }
}

#[test]
fn posix_memalign_various_alignments() {
    unsafe {
        for align in [8, 16, 64, 256, page()] {
            let mut out: *mut c_void = ptr::null_mut();
            assert_eq!(ffi::posix_memalign(&mut out, align, 100), 0);
            assert!(!out.is_null());
            assert_eq!(out as usize % align, 0, "align={align}");
            ffi::free(out);
        }
    }
}

#[test]
fn posix_memalign_rejects_bad_alignment() {
    unsafe {
        let mut out: *mut c_void = ptr::null_mut();
        // Not a multiple of sizeof(void *).
        assert_eq!(ffi::posix_memalign(&mut out, 4, 16), libc::EINVAL);
        // Not a power of two.
        assert_eq!(ffi::posix_memalign(&mut out, 24, 16), libc::EINVAL);
        // Larger than a page.
        assert_eq!(ffi::posix_memalign(&mut out, page() * 2, 16), libc::EINVAL);
        assert!(out.is_null(), "output must be untouched on failure");
        assert_eq!(ffi::posix_memalign(ptr::null_mut(), 16, 16), libc::EINVAL);
    }
}

#[test]
fn posix_memalign_reports_exhaustion() {
    unsafe {
        let mut out: *mut c_void = ptr::null_mut();
        assert_eq!(ffi::posix_memalign(&mut out, 16, usize::MAX - 64), libc::ENOMEM);
        assert!(out.is_null());
    }
}

#[test]
fn aligned_alloc_sets_errno_on_bad_alignment() {
    unsafe {
        let p = ffi::aligned_alloc(3, 16);
        assert!(p.is_null());
        assert_eq!(errno(), libc::EINVAL);

        let p = ffi::aligned_alloc(32, 64);
        assert!(!p.is_null());
        assert_eq!(p as usize % 32, 0);
        ffi::free(p);

        let p = ffi::memalign(128, 10);
        assert!(!p.is_null());
        assert_eq!(p as usize % 128, 0);
        assert_eq!(ffi::malloc_usable_size(p), 128);
        ffi::free(p);
    }
}

#[test]
fn valloc_and_pvalloc_are_page_aligned() {
    unsafe {
        let page = page();
        let v = ffi::valloc(1);
        assert_eq!(v as usize % page, 0);
        ffi::free(v);

        let p = ffi::pvalloc(0);
        assert_eq!(p as usize % page, 0);
        assert_eq!(ffi::malloc_usable_size(p), page);
        ffi::free(p);
    }
}

#[test]
fn settings_default_to_trailing_guard() {
    // Unless the environment overrides them.
    if std::env::var_os("PAGEFENCE_PROTECT_BELOW").is_some()
        || std::env::var_os("PAGEFENCE_ALIGNMENT").is_some()
        || std::env::var_os("PAGEFENCE_DISABLE").is_some()
    {
        return;
    }
    unsafe {
        let p = ffi::malloc(1) as usize;
        assert_eq!((p + MALLOC_ALIGN) % page(), 0);
        ffi::free(p as *mut c_void);
    }
    assert!(ffi::PAGEFENCE_SETTINGS.enabled());
    assert_eq!(ffi::PAGEFENCE_SETTINGS.alignment(), MALLOC_ALIGN);
}
