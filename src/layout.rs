//! Placement arithmetic for a guarded block.
//!
//! Everything here is pure address math on `usize`; nothing is read or
//! written. The engine in [`crate::guard`] applies the result to memory.
//!
//! ```text
//!   Trailing guard (catches overruns):
//!
//!   backing                                         backing + backing_size
//!   ┌──────────┬──────────┬──────────────────┬────────────┬─────────┐
//!   │  slack   │  header  │    user bytes    │ GUARD PAGE │  slack  │
//!   └──────────┴──────────┴──────────────────┴────────────┴─────────┘
//!                         ▲ user             ▲ guard = user + user_size
//!
//!   Leading guard (catches underruns):
//!
//!   ┌──────────┬──────────┬────────────┬──────────────────┬─────────┐
//!   │  slack   │  header  │ GUARD PAGE │    user bytes    │  slack  │
//!   └──────────┴──────────┴────────────┴──────────────────┴─────────┘
//!                         ▲ guard      ▲ user = guard + page
//! ```
//!
//! The header always ends on a word boundary: directly below `user`
//! (rounded down) in trailing mode, directly below the guard page in
//! leading mode.

use crate::config::Orientation;
use crate::metadata::BlockMetadata;

/// Machine word size; every header slot is aligned to it.
pub const WORD: usize = core::mem::size_of::<usize>();

/// Bytes reserved for the block header.
pub const METADATA_SIZE: usize = core::mem::size_of::<BlockMetadata>();

/// Round `value` up to a multiple of `align` (a power of two).
#[inline(always)]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Round `value` down to a multiple of `align` (a power of two).
#[inline(always)]
pub const fn align_down(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    value & !(align - 1)
}

/// `align_up` returning `None` instead of wrapping.
#[inline]
pub const fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Backing bytes needed for a `user_size` block.
///
/// `round_up(user_size, WORD) + header + 2 pages`. Only one page is ever
/// revoked; the second absorbs rounding so the guard page always fits whole
/// inside the backing allocation whatever alignment the backing allocator
/// hands back. `None` when the sum overflows.
#[inline]
pub const fn backing_size(user_size: usize, page: usize) -> Option<usize> {
    let rounded = match checked_align_up(user_size, WORD) {
        Some(r) => r,
        None => return None,
    };
    let pages = match page.checked_mul(2) {
        Some(p) => p,
        None => return None,
    };
    match rounded.checked_add(METADATA_SIZE) {
        Some(v) => v.checked_add(pages),
        None => None,
    }
}

/// Where everything lives inside one backing allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub backing: usize,
    pub backing_size: usize,
    /// Address handed to the caller.
    pub user: usize,
    pub user_size: usize,
    /// Start of the revoked page; exactly one page long.
    pub guard: usize,
    /// Address of the [`BlockMetadata`] header.
    pub slot: usize,
}

impl Placement {
    /// Header lies inside the backing allocation and below both the guard
    /// page and the user bytes; guard page and user bytes do not overlap.
    pub fn is_consistent(&self, page: usize) -> bool {
        let end = self.backing + self.backing_size;
        let slot_end = self.slot + METADATA_SIZE;
        let guard_end = self.guard + page;
        let user_end = self.user + self.user_size;
        let user_clear_of_guard = user_end <= self.guard || self.user >= guard_end;
        self.slot >= self.backing
            && self.slot % WORD == 0
            && self.guard % page == 0
            && guard_end <= end
            && user_end <= end
            && slot_end <= self.guard
            && slot_end <= self.user
            && user_clear_of_guard
    }
}

/// Lay out a `user_size` block inside `[backing, backing + backing_size)`.
///
/// `backing_size` must be at least `backing_size(user_size, page)`.
pub fn place(
    orientation: Orientation,
    backing: usize,
    backing_size: usize,
    user_size: usize,
    page: usize,
) -> Placement {
    let (guard, user) = match orientation {
        Orientation::Trailing => {
            let guard = align_down(backing + backing_size, page) - page;
            (guard, guard - user_size)
        }
        Orientation::Leading => {
            let guard = align_up(backing + METADATA_SIZE, page);
            (guard, guard + page)
        }
    };
    let placement = Placement {
        backing,
        backing_size,
        user,
        user_size,
        guard,
        slot: metadata_slot(orientation, user, page),
    };
    debug_assert!(placement.is_consistent(page), "{:?}", placement);
    placement
}

/// Header address for a user pointer, by the same rule [`place`] used.
///
/// Wrapping arithmetic: `user` may be a stray pointer, and the sentinel
/// check downstream is what rejects it.
#[inline]
pub const fn metadata_slot(orientation: Orientation, user: usize, page: usize) -> usize {
    let anchor = match orientation {
        Orientation::Trailing => user,
        Orientation::Leading => user.wrapping_sub(page),
    };
    align_down(anchor, WORD).wrapping_sub(METADATA_SIZE)
}
