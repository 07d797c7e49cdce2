//! Process-wide configuration: which side the guard page goes on, how
//! `malloc` results are aligned, and whether guarding is on at all.
//!
//! Defaults are baked in at build time from `pagefence.toml`. A [`Settings`]
//! record is plain atomics so it can sit in a `static`, be exported to C, and
//! be flipped by tests between allocations. Nothing here is synchronized
//! beyond single-word atomicity: change it at startup or while no other
//! thread is allocating.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

mod generated {
    include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
}

pub use generated::SENTINEL;

/// Which side of the user buffer carries the guard page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Orientation {
    /// Guard page right after the buffer. Catches overruns.
    #[default]
    Trailing = 0,
    /// Guard page right before the buffer. Catches underruns.
    Leading = 1,
}

impl Orientation {
    #[inline]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Orientation::Trailing,
            _ => Orientation::Leading,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Orientation::Trailing => "trailing",
            Orientation::Leading => "leading",
        }
    }
}

/// Build-time default orientation.
pub const DEFAULT_ORIENTATION: Orientation = Orientation::from_u8(generated::DEFAULT_ORIENTATION);
/// Build-time default for the enabled switch.
pub const DEFAULT_ENABLED: bool = generated::DEFAULT_ENABLED;
/// Build-time default alignment of `malloc`/`calloc`/`realloc` results.
pub const DEFAULT_ALIGNMENT: usize = generated::DEFAULT_ALIGNMENT;

/// The runtime knobs.
///
/// `#[repr(C)]` so the `ffi` build can export it as
/// `struct { unsigned char orientation; bool enabled; size_t alignment; }`.
#[repr(C)]
#[derive(Debug)]
pub struct Settings {
    orientation: AtomicU8,
    enabled: AtomicBool,
    alignment: AtomicUsize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// Settings seeded from the build-time defaults.
    pub const fn new() -> Self {
        Self::with_alignment(DEFAULT_ORIENTATION, DEFAULT_ENABLED, DEFAULT_ALIGNMENT)
    }

    /// Exact-fit settings: alignment 1, so every `malloc` block ends on the
    /// byte before its trailing guard page.
    pub const fn with(orientation: Orientation, enabled: bool) -> Self {
        Self::with_alignment(orientation, enabled, 1)
    }

    /// `alignment` must be a power of two.
    pub const fn with_alignment(orientation: Orientation, enabled: bool, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two());
        Self {
            orientation: AtomicU8::new(orientation as u8),
            enabled: AtomicBool::new(enabled),
            alignment: AtomicUsize::new(alignment),
        }
    }

    #[inline]
    pub fn orientation(&self) -> Orientation {
        Orientation::from_u8(self.orientation.load(Ordering::Relaxed))
    }

    /// Switch orientation. Blocks allocated under the old orientation must be
    /// released before switching: their header is looked up by the current
    /// orientation, and that lookup may land on a revoked page and fault.
    pub fn set_orientation(&self, orientation: Orientation) {
        let old = self.orientation.swap(orientation as u8, Ordering::Relaxed);
        if old != orientation as u8 {
            fence_log!(info, "orientation {} -> {}", Orientation::from_u8(old).name(), orientation.name());
        }
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn guarding on or off. While off every call goes straight to the
    /// backing allocator. Blocks must be released under the same setting
    /// they were allocated with.
    pub fn set_enabled(&self, enabled: bool) {
        let old = self.enabled.swap(enabled, Ordering::Relaxed);
        if old != enabled {
            fence_log!(info, "guarding {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    /// Alignment applied to `malloc`, `calloc` and `realloc` results, and the
    /// floor for `memalign`.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment.load(Ordering::Relaxed)
    }

    /// Change the `malloc` alignment. Returns false, leaving the setting
    /// alone, unless `alignment` is a power of two.
    pub fn set_alignment(&self, alignment: usize) -> bool {
        if !alignment.is_power_of_two() {
            fence_log!(info, "ignoring alignment {}: not a power of two", alignment);
            return false;
        }
        let old = self.alignment.swap(alignment, Ordering::Relaxed);
        if old != alignment {
            fence_log!(info, "alignment {} -> {}", old, alignment);
        }
        true
    }

    /// Apply `PAGEFENCE_PROTECT_BELOW`, `PAGEFENCE_ALIGNMENT` and
    /// `PAGEFENCE_DISABLE` from the environment.
    ///
    /// `PAGEFENCE_PROTECT_BELOW` holds an integer: non-zero selects the
    /// leading guard, zero the trailing guard, anything unparsable is
    /// ignored. `PAGEFENCE_ALIGNMENT` holds a power of two; anything else is
    /// ignored. `PAGEFENCE_DISABLE` disables guarding when present.
    ///
    /// # Safety
    /// Calls `libc::getenv`, which races with concurrent `setenv`. Call it
    /// during startup.
    pub unsafe fn apply_env(&self) {
        if let Some(below) = unsafe { getenv_usize(b"PAGEFENCE_PROTECT_BELOW\0") } {
            self.set_orientation(if below != 0 {
                Orientation::Leading
            } else {
                Orientation::Trailing
            });
        }
        if let Some(alignment) = unsafe { getenv_usize(b"PAGEFENCE_ALIGNMENT\0") } {
            self.set_alignment(alignment);
        }
        if unsafe { env_present(b"PAGEFENCE_DISABLE\0") } {
            self.set_enabled(false);
        }
    }
}

unsafe fn env_present(key: &[u8]) -> bool {
    !unsafe { libc::getenv(key.as_ptr() as *const libc::c_char) }.is_null()
}

/// Parse an environment variable as a usize without allocating.
unsafe fn getenv_usize(key: &[u8]) -> Option<usize> {
    let val = unsafe { libc::getenv(key.as_ptr() as *const libc::c_char) };
    if val.is_null() {
        return None;
    }

    let mut result: usize = 0;
    let mut ptr = val as *const u8;
    let mut digits = 0;
    loop {
        let byte = unsafe { *ptr };
        if byte == 0 {
            break;
        }
        if !byte.is_ascii_digit() {
            return None;
        }
        result = result.checked_mul(10)?.checked_add((byte - b'0') as usize)?;
        digits += 1;
        ptr = unsafe { ptr.add(1) };
    }
    if digits == 0 { None } else { Some(result) }
}
