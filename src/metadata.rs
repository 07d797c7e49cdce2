//! Block header stored just below each guarded user pointer.
//!
//! ```text
//!   ┌─────────────────────────────┐  slot (word aligned)
//!   │ sentinel                    │  SENTINEL while live, RETIRED after free
//!   │ backing                     │  pointer to hand back to the backing allocator
//!   │ backing_size                │
//!   │ guard                       │  page to restore on release
//!   │ user_size                   │  bytes requested by the caller
//!   └─────────────────────────────┘  slot + METADATA_SIZE
//! ```
//!
//! The header is found again purely by address arithmetic
//! ([`crate::layout::metadata_slot`]), so a stray pointer leads to a random
//! read; the sentinel is the only thing standing between that read and
//! freeing garbage.

use crate::config::SENTINEL;
use crate::error::FenceError;

/// Written over the sentinel on release so a second release of the same
/// pointer fails the check.
pub const RETIRED: usize = 0;

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockMetadata {
    pub sentinel: usize,
    pub backing: usize,
    pub backing_size: usize,
    pub guard: usize,
    pub user_size: usize,
}

impl BlockMetadata {
    pub const fn new(backing: usize, backing_size: usize, guard: usize, user_size: usize) -> Self {
        Self {
            sentinel: SENTINEL,
            backing,
            backing_size,
            guard,
            user_size,
        }
    }

    #[inline]
    pub const fn is_live(&self) -> bool {
        self.sentinel == SENTINEL
    }

    /// Store `self` at `slot`.
    ///
    /// # Safety
    /// `slot` must be word aligned and valid for writes of a header.
    #[inline]
    pub unsafe fn write(self, slot: usize) {
        unsafe { core::ptr::write(slot as *mut BlockMetadata, self) };
    }

    /// Load the header at `slot` without checking it.
    ///
    /// # Safety
    /// `slot` must be word aligned and readable.
    #[inline]
    pub unsafe fn read(slot: usize) -> Self {
        unsafe { core::ptr::read(slot as *const BlockMetadata) }
    }

    /// Load the header at `slot` and check its sentinel. `user` is only used
    /// for the error report.
    ///
    /// # Safety
    /// Same as [`BlockMetadata::read`].
    #[inline]
    pub unsafe fn validate(slot: usize, user: usize) -> Result<Self, FenceError> {
        let meta = unsafe { Self::read(slot) };
        if meta.is_live() {
            Ok(meta)
        } else {
            Err(FenceError::Corrupt {
                user,
                slot,
                found: meta.sentinel,
            })
        }
    }

    /// Overwrite the sentinel at `slot` with [`RETIRED`].
    ///
    /// # Safety
    /// Same as [`BlockMetadata::write`].
    #[inline]
    pub unsafe fn retire(slot: usize) {
        unsafe { core::ptr::write(slot as *mut usize, RETIRED) };
    }
}
