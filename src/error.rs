//! Unrecoverable conditions and the abort path.
//!
//! Running out of memory is not an error here: it is a null return, same as
//! the backing allocator. Everything in [`FenceError`] means the guard
//! guarantee is already broken, so the allocator surface turns it into
//! [`fatal`].

use crate::platform::Access;
use core::fmt;

/// errno value reported by a failed OS call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OsError(pub i32);

impl OsError {
    /// Capture the calling thread's current errno.
    pub fn last() -> Self {
        OsError(crate::platform::last_errno())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceError {
    /// The page protection primitive refused to change a guard page.
    Protect {
        addr: usize,
        len: usize,
        access: Access,
        errno: i32,
    },
    /// The header in front of a released pointer does not carry the
    /// sentinel: double free, foreign pointer, or an underrun that reached
    /// the header.
    Corrupt { user: usize, slot: usize, found: usize },
    /// The header is intact but names a guard page that does not border the
    /// pointer being released, as for a pointer into the middle of a block.
    Mismatch { user: usize, guard: usize },
}

impl fmt::Display for FenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FenceError::Protect {
                addr,
                len,
                access,
                errno,
            } => write!(
                f,
                "mprotect({:#x}, {:#x}, {}) failed (errno {})",
                addr,
                len,
                access.name(),
                errno
            ),
            FenceError::Corrupt { user, slot, found } => write!(
                f,
                "bad block header for {:#x}: sentinel at {:#x} is {:#x} \
                 (double free, foreign pointer, or corrupted header)",
                user, slot, found
            ),
            FenceError::Mismatch { user, guard } => write!(
                f,
                "block header for {:#x} names guard page {:#x}, which does not border it",
                user, guard
            ),
        }
    }
}

/// Fixed-size, allocation-free `fmt::Write` sink. Output past the end is
/// truncated.
struct StackBuf {
    buf: [u8; 256],
    len: usize,
}

impl fmt::Write for StackBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let n = s.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Report `err` and abort the process.
///
/// The message goes to fd 2 straight from the stack: the heap is suspect
/// by the time this runs.
#[cold]
#[inline(never)]
pub fn fatal(err: &FenceError) -> ! {
    use core::fmt::Write;

    fence_log!(error, "{}", err);

    let mut out = StackBuf {
        buf: [0; 256],
        len: 0,
    };
    let _ = writeln!(out, "pagefence: {}", err);
    unsafe {
        libc::write(2, out.buf.as_ptr() as *const libc::c_void, out.len);
        libc::abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use std::format;

    #[test]
    fn test_display_protect() {
        let err = FenceError::Protect {
            addr: 0x1000,
            len: 0x1000,
            access: Access::None,
            errno: 12,
        };
        assert_eq!(
            format!("{err}"),
            "mprotect(0x1000, 0x1000, PROT_NONE) failed (errno 12)"
        );
    }

    #[test]
    fn test_display_corrupt_mentions_addresses() {
        let err = FenceError::Corrupt {
            user: 0x2010,
            slot: 0x1fe0,
            found: 0,
        };
        let msg = format!("{err}");
        assert!(msg.contains("0x2010"));
        assert!(msg.contains("0x1fe0"));
        assert!(msg.contains("double free"));
    }

    #[test]
    fn test_stack_buf_truncates() {
        let mut out = StackBuf {
            buf: [0; 256],
            len: 0,
        };
        for _ in 0..100 {
            out.write_str("0123456789").unwrap();
        }
        assert_eq!(out.len, 256);
        assert_eq!(&out.buf[..10], b"0123456789");
    }
}
