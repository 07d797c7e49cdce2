#![no_std]

//! pagefence: a guard-page allocator that turns heap overruns into faults.
//!
//! Every block is carved out of a larger backing allocation so that the
//! user buffer sits flush against a page whose permissions are revoked.
//! The first byte read or written past the buffer lands on that page and
//! the kernel kills the process on the spot, instead of the bug silently
//! corrupting a neighbour.
//!
//! Two orientations are available:
//! - trailing guard (default): the guard page follows the buffer, catching
//!   overruns
//! - leading guard: the guard page precedes the buffer, catching underruns
//!
//! A block only catches one direction, so run the suite once per
//! orientation.
//!
//! # Usage
//!
//! ```ignore
//! static SETTINGS: pagefence::Settings = pagefence::Settings::new();
//!
//! #[global_allocator]
//! static GLOBAL: pagefence::PageFence<'static> = pagefence::PageFence::system(&SETTINGS);
//! ```
//!
//! With the `ffi` feature the crate also exports the C `malloc` family so a
//! shared build can be preloaded into an unmodified process:
//!
//! ```text
//! cargo rustc --profile fast --features ffi --crate-type cdylib
//! LD_PRELOAD=target/fast/libpagefence.so ./program
//! ```

#[cfg(any(test, feature = "std"))]
extern crate std;

#[macro_use]
mod macros;

pub mod allocator;
pub mod config;
pub mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod guard;
pub mod layout;
pub mod metadata;
pub mod platform;
#[cfg(feature = "stats")]
pub mod stats;

pub use allocator::{GuardAlloc, PageFence};
pub use config::{Orientation, Settings};
pub use error::FenceError;
pub use platform::{Access, Backing, Protect, System};

// Panic handler for the cdylib/staticlib builds above (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe { libc::abort() }
}
