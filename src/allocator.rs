//! Allocation surface: the `malloc` family and `GlobalAlloc`, dispatching to
//! the guard engine or, when guarding is switched off, straight to the
//! backing allocator.
//!
//! The allocator owns no mutable state of its own. The knobs live in a
//! [`Settings`] record it borrows, the headers live in the blocks.

use crate::config::Settings;
use crate::error::fatal;
use crate::guard;
use crate::layout::{self, WORD};
use crate::metadata::BlockMetadata;
use crate::platform::{Backing, Protect, System};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

/// Guard-page allocator over a backing allocator `B` and protection
/// primitive `P`, configured by a borrowed [`Settings`].
#[derive(Debug)]
pub struct GuardAlloc<'s, B, P> {
    backing: B,
    protect: P,
    settings: &'s Settings,
}

/// The allocator over the process's real `malloc` and `mprotect`.
///
/// ```ignore
/// static SETTINGS: pagefence::Settings = pagefence::Settings::new();
///
/// #[global_allocator]
/// static GLOBAL: pagefence::PageFence<'static> = pagefence::PageFence::system(&SETTINGS);
/// ```
pub type PageFence<'s> = GuardAlloc<'s, System, System>;

impl<'s> PageFence<'s> {
    pub const fn system(settings: &'s Settings) -> Self {
        GuardAlloc::new(System, System, settings)
    }
}

impl<'s, B: Backing, P: Protect> GuardAlloc<'s, B, P> {
    pub const fn new(backing: B, protect: P, settings: &'s Settings) -> Self {
        Self {
            backing,
            protect,
            settings,
        }
    }

    #[inline]
    pub fn settings(&self) -> &'s Settings {
        self.settings
    }

    pub fn backing(&self) -> &B {
        &self.backing
    }

    pub fn protect(&self) -> &P {
        &self.protect
    }

    /// Allocate `size` bytes aligned to [`Settings::alignment`].
    ///
    /// `size` is rounded up to that alignment, so in trailing mode the guard
    /// page starts at the rounded size; with alignment 1 it starts exactly at
    /// `size`. `size == 0` still yields a unique pointer.
    ///
    /// # Safety
    /// Same contract as C `malloc`.
    pub unsafe fn malloc(&self, size: usize) -> *mut u8 {
        let ptr = if self.settings.enabled() {
            unsafe { self.alloc_rounded(self.settings.alignment(), size) }
        } else {
            unsafe { self.alloc_passthrough(size) }
        };
        fence_log!(debug, "malloc({}) = {:p}", size, ptr);
        ptr
    }

    /// Release a block. Null is ignored. A pointer this allocator does not
    /// own, or one already released, aborts the process.
    ///
    /// # Safety
    /// Same contract as C `free`, and the block must have been allocated
    /// under the current enabled/orientation settings.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        fence_log!(debug, "free({:p})", ptr);
        if self.settings.enabled() {
            unsafe { self.free_guarded(ptr) };
        } else {
            stat_inc!(passthrough_frees);
            unsafe { self.backing.free(ptr) };
        }
    }

    /// Resize by allocating a fresh guarded block, copying
    /// `min(old, new)` bytes, and releasing the old block.
    ///
    /// Never resizes in place, so the result always moves. On exhaustion the
    /// old block is left untouched and null is returned.
    ///
    /// # Safety
    /// Same contract as C `realloc`.
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let new = if !self.settings.enabled() {
            stat_inc!(passthrough_allocs);
            unsafe { self.backing.realloc(ptr, size) }
        } else {
            unsafe { self.resize_guarded(ptr, self.settings.alignment(), size) }
        };
        fence_log!(debug, "realloc({:p}, {}) = {:p}", ptr, size, new);
        new
    }

    /// Allocate `count * size` zeroed bytes. Null when the product
    /// overflows.
    ///
    /// # Safety
    /// Same contract as C `calloc`.
    pub unsafe fn calloc(&self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            fence_log!(debug, "calloc({}, {}) overflows", count, size);
            stat_inc!(exhausted);
            return ptr::null_mut();
        };
        let ptr = unsafe { self.malloc(total) };
        if !ptr.is_null() {
            unsafe { ptr::write_bytes(ptr, 0, total) };
        }
        ptr
    }

    /// Allocate with the returned address a multiple of `align`.
    ///
    /// `size` is rounded up to a multiple of `align` first, which keeps the
    /// trailing guard flush against the rounded size: bytes between `size`
    /// and the next multiple of `align` are accessible slack. `align` must be
    /// a power of two no larger than the page size, otherwise null. The
    /// result is never less aligned than [`Settings::alignment`].
    ///
    /// # Safety
    /// Same contract as C `memalign`.
    pub unsafe fn memalign(&self, align: usize, size: usize) -> *mut u8 {
        if !self.alignment_supported(align) {
            fence_log!(debug, "memalign({}, {}): unsupported alignment", align, size);
            return ptr::null_mut();
        }
        let ptr = if self.settings.enabled() {
            let align = align.max(self.settings.alignment());
            unsafe { self.alloc_rounded(align, size) }
        } else {
            stat_inc!(passthrough_allocs);
            unsafe { self.backing.alloc_aligned(align.max(WORD), size) }
        };
        fence_log!(debug, "memalign({}, {}) = {:p}", align, size, ptr);
        ptr
    }

    /// Page-aligned allocation.
    ///
    /// # Safety
    /// Same contract as C `valloc`.
    pub unsafe fn valloc(&self, size: usize) -> *mut u8 {
        unsafe { self.memalign(self.protect.page_size(), size) }
    }

    /// Page-aligned allocation of `size` rounded up to whole pages (one page
    /// for zero).
    ///
    /// # Safety
    /// Same contract as C `pvalloc`.
    pub unsafe fn pvalloc(&self, size: usize) -> *mut u8 {
        let page = self.protect.page_size();
        match layout::checked_align_up(size.max(1), page) {
            Some(rounded) => unsafe { self.memalign(page, rounded) },
            None => ptr::null_mut(),
        }
    }

    /// Usable bytes behind a guarded pointer: the requested size, after
    /// alignment rounding. `None` while guarding is disabled, since the
    /// block then belongs to the backing allocator.
    ///
    /// # Safety
    /// `ptr` must be null or a live block from this allocator.
    pub unsafe fn usable_size(&self, ptr: *mut u8) -> Option<usize> {
        if ptr.is_null() {
            return Some(0);
        }
        if !self.settings.enabled() {
            return None;
        }
        Some(unsafe { self.header(ptr) }.user_size)
    }

    /// Whether `align` can be honoured: a power of two no larger than a
    /// page. Larger alignments would need the guard page itself aligned
    /// beyond a page, which the sizing rule does not reserve room for.
    pub fn alignment_supported(&self, align: usize) -> bool {
        align.is_power_of_two() && align <= self.protect.page_size()
    }

    unsafe fn alloc_passthrough(&self, size: usize) -> *mut u8 {
        stat_inc!(passthrough_allocs);
        unsafe { self.backing.alloc(size) }
    }

    /// Null when `align` exceeds a page: placement cannot honour it.
    unsafe fn alloc_rounded(&self, align: usize, size: usize) -> *mut u8 {
        if !self.alignment_supported(align) {
            fence_log!(debug, "alignment {} exceeds a page", align);
            return ptr::null_mut();
        }
        match layout::checked_align_up(size, align) {
            Some(rounded) => unsafe { self.alloc_guarded(rounded) },
            None => {
                stat_inc!(exhausted);
                ptr::null_mut()
            }
        }
    }

    unsafe fn alloc_guarded(&self, user_size: usize) -> *mut u8 {
        let page = self.protect.page_size();
        let Some(size) = layout::backing_size(user_size, page) else {
            stat_inc!(exhausted);
            return ptr::null_mut();
        };
        let raw = unsafe { self.backing.alloc(size) };
        if raw.is_null() {
            stat_inc!(exhausted);
            fence_log!(debug, "backing allocator refused {} bytes", size);
            return ptr::null_mut();
        }
        stat_inc!(guarded_allocs);
        stat_add!(backing_bytes, size);
        match unsafe { guard::arm(&self.protect, self.settings.orientation(), raw, size, user_size) } {
            Ok(user) => user,
            Err(err) => fatal(&err),
        }
    }

    unsafe fn free_guarded(&self, ptr: *mut u8) {
        match unsafe { guard::disarm(&self.protect, self.settings.orientation(), ptr) } {
            Ok(released) => {
                stat_inc!(guarded_frees);
                unsafe { self.backing.free(released.backing) };
            }
            Err(err) => fatal(&err),
        }
    }

    unsafe fn header(&self, ptr: *mut u8) -> BlockMetadata {
        let page = self.protect.page_size();
        match unsafe { guard::inspect(self.settings.orientation(), ptr, page) } {
            Ok(meta) => meta,
            Err(err) => fatal(&err),
        }
    }

    unsafe fn resize_guarded(&self, ptr: *mut u8, align: usize, size: usize) -> *mut u8 {
        if ptr.is_null() {
            return unsafe { self.memalign(align, size) };
        }
        stat_inc!(resizes);
        // Validate the old block before allocating so a bad pointer aborts
        // without leaking a fresh guard page.
        let old_size = unsafe { self.header(ptr) }.user_size;
        let new = unsafe { self.memalign(align, size) };
        if new.is_null() {
            return new;
        }
        unsafe { ptr::copy_nonoverlapping(ptr, new, old_size.min(size)) };
        unsafe { self.free_guarded(ptr) };
        new
    }
}

unsafe impl<B: Backing, P: Protect> GlobalAlloc for GuardAlloc<'_, B, P> {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        unsafe { self.memalign(layout.align(), layout.size()) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        unsafe { self.free(ptr) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if self.settings.enabled() {
            return unsafe { self.resize_guarded(ptr, layout.align(), new_size) };
        }

        stat_inc!(passthrough_allocs);
        if layout.align() <= WORD {
            return unsafe { self.backing.realloc(ptr, new_size) };
        }
        // The backing realloc only promises malloc alignment.
        let new = unsafe { self.backing.alloc_aligned(layout.align(), new_size) };
        if !new.is_null() {
            unsafe { ptr::copy_nonoverlapping(ptr, new, layout.size().min(new_size)) };
            stat_inc!(passthrough_frees);
            unsafe { self.backing.free(ptr) };
        }
        new
    }
}
