//! Guard placement engine: arm a backing allocation with a guard page, and
//! undo it again from nothing but the user pointer.

use crate::config::Orientation;
use crate::error::FenceError;
use crate::layout::{self, Placement};
use crate::metadata::BlockMetadata;
use crate::platform::{Access, Protect};

/// What [`disarm`] hands back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Released {
    /// Pointer to return to the backing allocator.
    pub backing: *mut u8,
    pub backing_size: usize,
    pub user_size: usize,
}

#[inline]
unsafe fn set_guard<P: Protect + ?Sized>(
    protect: &P,
    guard: usize,
    page: usize,
    access: Access,
) -> Result<(), FenceError> {
    stat_inc!(protect_calls);
    unsafe { protect.protect(guard as *mut u8, page, access) }.map_err(|e| FenceError::Protect {
        addr: guard,
        len: page,
        access,
        errno: e.0,
    })
}

/// Revoke the guard page for a `user_size` block carved from
/// `[backing, backing + backing_size)`, write its header, and return the
/// user pointer.
///
/// # Safety
/// `backing` must be a live backing allocation of `backing_size` bytes, at
/// least word aligned, with `backing_size >= layout::backing_size(user_size,
/// page)`. Nothing else may be using it.
pub unsafe fn arm<P: Protect + ?Sized>(
    protect: &P,
    orientation: Orientation,
    backing: *mut u8,
    backing_size: usize,
    user_size: usize,
) -> Result<*mut u8, FenceError> {
    let page = protect.page_size();
    let Placement {
        backing,
        backing_size,
        user,
        guard,
        slot,
        ..
    } = layout::place(orientation, backing as usize, backing_size, user_size, page);

    unsafe { set_guard(protect, guard, page, Access::None)? };
    unsafe { BlockMetadata::new(backing, backing_size, guard, user_size).write(slot) };

    fence_log!(
        debug,
        "arm {}: backing {:#x}+{:#x} user {:#x}+{:#x} guard {:#x}",
        orientation.name(),
        backing,
        backing_size,
        user,
        user_size,
        guard
    );
    Ok(user as *mut u8)
}

/// Read and check the header of a live block without touching its guard.
///
/// Besides the sentinel, the recorded guard page must border `user` on the
/// side `orientation` puts it.
///
/// # Safety
/// The header slot computed from `user` must be readable, which holds for
/// any pointer returned by [`arm`] under the same orientation.
pub unsafe fn inspect(
    orientation: Orientation,
    user: *mut u8,
    page: usize,
) -> Result<BlockMetadata, FenceError> {
    let user = user as usize;
    let slot = layout::metadata_slot(orientation, user, page);
    let meta = unsafe { BlockMetadata::validate(slot, user)? };
    let expected_guard = match orientation {
        Orientation::Trailing => user.wrapping_add(meta.user_size),
        Orientation::Leading => user.wrapping_sub(page),
    };
    if meta.guard != expected_guard {
        return Err(FenceError::Mismatch {
            user,
            guard: meta.guard,
        });
    }
    Ok(meta)
}

/// Restore the guard page of the block at `user`, retire its header, and
/// return where its backing allocation starts.
///
/// # Safety
/// `user` should come from [`arm`] under the same orientation. Anything else
/// is caught by the header check as long as the computed slot is readable.
pub unsafe fn disarm<P: Protect + ?Sized>(
    protect: &P,
    orientation: Orientation,
    user: *mut u8,
) -> Result<Released, FenceError> {
    let page = protect.page_size();
    let meta = unsafe { inspect(orientation, user, page)? };

    unsafe { set_guard(protect, meta.guard, page, Access::ReadWrite)? };
    unsafe { BlockMetadata::retire(layout::metadata_slot(orientation, user as usize, page)) };

    fence_log!(
        debug,
        "disarm {}: user {:#x} guard {:#x} backing {:#x}",
        orientation.name(),
        user as usize,
        meta.guard,
        meta.backing
    );
    Ok(Released {
        backing: meta.backing as *mut u8,
        backing_size: meta.backing_size,
        user_size: meta.user_size,
    })
}
