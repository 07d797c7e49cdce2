//! Alignment edge case tests.
//!
//! Verifies that guarded allocations respect alignment requirements, that
//! the trailing guard sits flush against the alignment-rounded size, and that
//! alignments beyond a page are refused.

use pagefence::{Orientation, PageFence, Protect, Settings, System};
use std::alloc::{GlobalAlloc, Layout};

static TRAILING: Settings = Settings::with(Orientation::Trailing, true);
static LEADING: Settings = Settings::with(Orientation::Leading, true);

static FENCE: PageFence<'static> = PageFence::system(&TRAILING);
static FENCE_BELOW: PageFence<'static> = PageFence::system(&LEADING);

fn page() -> usize {
    System.page_size()
}

#[test]
fn test_standard_alignments() {
    for align in [1, 2, 4, 8] {
        for &size in &[1, 7, 8, 15, 16, 31, 64, 255, 256, 1024, 4096] {
            if size < align {
                continue;
            }
            let layout = Layout::from_size_align(size, align).unwrap();
            let ptr = unsafe { FENCE.alloc(layout) };
            assert!(!ptr.is_null(), "alloc failed: size={size}, align={align}");
            assert_eq!(
                ptr as usize % align,
                0,
                "misaligned: ptr={ptr:?}, size={size}, align={align}"
            );
            // Write to verify it's usable
            unsafe { ptr.write_bytes(0xAB, size) };
            unsafe { FENCE.dealloc(ptr, layout) };
        }
    }
}

#[test]
fn test_over_aligned() {
    for align in [16, 32, 64, 128, 256, 1024] {
        for &size in &[1, 10, 64, 128, 1000, 4096] {
            let layout = Layout::from_size_align(size, align).unwrap();
            let ptr = unsafe { FENCE.alloc(layout) };
            assert!(!ptr.is_null(), "alloc failed: size={size}, align={align}");
            assert_eq!(
                ptr as usize % align,
                0,
                "misaligned: ptr={ptr:?}, size={size}, align={align}"
            );
            unsafe { ptr.write_bytes(0xCD, size) };
            unsafe { FENCE.dealloc(ptr, layout) };
        }
    }
}

#[test]
fn test_page_alignment() {
    let page = page();
    for &size in &[1, 100, page, page + 1, 3 * page] {
        let layout = Layout::from_size_align(size, page).unwrap();
        let ptr = unsafe { FENCE.alloc(layout) };
        assert!(!ptr.is_null(), "alloc failed: size={size}, align={page}");
        assert_eq!(ptr as usize % page, 0);
        unsafe { ptr.write_bytes(0x42, size) };
        unsafe { FENCE.dealloc(ptr, layout) };
    }
}

#[test]
fn test_beyond_page_alignment_refused() {
    let align = page() * 2;
    let ptr = unsafe { FENCE.memalign(align, 64) };
    assert!(ptr.is_null());
    let ptr = unsafe { FENCE.memalign(48, 64) };
    assert!(ptr.is_null(), "non power of two alignment must be refused");
}

#[test]
fn test_aligned_size_is_rounded() {
    // 10 bytes at 64-byte alignment: the block is 64 usable bytes and the
    // guard page starts right after them.
    let ptr = unsafe { FENCE.memalign(64, 10) };
    assert!(!ptr.is_null());
    assert_eq!(ptr as usize % 64, 0);
    assert_eq!(unsafe { FENCE.usable_size(ptr) }, Some(64));
    assert_eq!((ptr as usize + 64) % page(), 0);
    unsafe { ptr.write_bytes(0x11, 64) };
    unsafe { FENCE.free(ptr) };
}

#[test]
fn test_trailing_block_ends_at_page_boundary() {
    let page = page();
    for &size in &[0, 1, 13, 100, 4095, 4096, 10_000] {
        let ptr = unsafe { FENCE.malloc(size) };
        assert!(!ptr.is_null(), "malloc({size}) failed");
        assert_eq!((ptr as usize + size) % page, 0, "size={size}");
        unsafe { FENCE.free(ptr) };
    }
}

#[test]
fn test_leading_blocks_are_page_aligned() {
    let page = page();
    for &size in &[0, 1, 13, 100, 4096, 10_000] {
        let ptr = unsafe { FENCE_BELOW.malloc(size) };
        assert!(!ptr.is_null(), "malloc({size}) failed");
        assert_eq!(ptr as usize % page, 0, "size={size}");
        unsafe { ptr.write_bytes(0x5A, size) };
        assert_eq!(unsafe { FENCE_BELOW.usable_size(ptr) }, Some(size));
        unsafe { FENCE_BELOW.free(ptr) };
    }
}

#[test]
fn test_realloc_preserves_alignment() {
    let layout = Layout::from_size_align(64, 64).unwrap();
    let ptr = unsafe { FENCE.alloc(layout) };
    assert!(!ptr.is_null());
    unsafe { ptr.write_bytes(0x77, 64) };

    let grown = unsafe { GlobalAlloc::realloc(&FENCE, ptr, layout, 300) };
    assert!(!grown.is_null());
    assert_eq!(grown as usize % 64, 0);
    for i in 0..64 {
        assert_eq!(unsafe { *grown.add(i) }, 0x77);
    }

    let layout = Layout::from_size_align(300, 64).unwrap();
    unsafe { FENCE.dealloc(grown, layout) };
}

#[test]
fn test_valloc_and_pvalloc() {
    let page = page();
    unsafe {
        let v = FENCE.valloc(10);
        assert!(!v.is_null());
        assert_eq!(v as usize % page, 0);
        FENCE.free(v);

        let p = FENCE.pvalloc(page + 1);
        assert!(!p.is_null());
        assert_eq!(p as usize % page, 0);
        assert_eq!(FENCE.usable_size(p), Some(2 * page));
        FENCE.free(p);
    }
}

#[test]
fn test_default_settings_give_malloc_alignment() {
    static DEFAULTS: Settings = Settings::new();
    let fence = PageFence::system(&DEFAULTS);
    let align = DEFAULTS.alignment();
    assert!(align >= 2 * std::mem::size_of::<usize>());

    unsafe {
        for &size in &[0, 1, 12, 20, 100, 4095] {
            let p = fence.malloc(size);
            assert!(!p.is_null(), "malloc({size}) failed");
            assert_eq!(p as usize % align, 0, "malloc({size}) misaligned: {p:?}");
            let rounded = (size + align - 1) & !(align - 1);
            // The guard sits flush against the rounded size.
            assert_eq!((p as usize + rounded) % page(), 0, "size={size}");
            fence.free(p);
        }

        let p = fence.calloc(5, 3);
        assert_eq!(p as usize % align, 0);
        let q = fence.realloc(p, 21);
        assert_eq!(q as usize % align, 0);
        fence.free(q);
    }
}
