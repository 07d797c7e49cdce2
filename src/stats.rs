//! Operation counters.
//!
//! All counters use `Relaxed` ordering. They are observational only; nothing
//! in the allocator reads them back.
//!
//! # Usage
//!
//! ```ignore
//! let snap = pagefence::stats::snapshot();
//! println!("guard pages armed: {}", snap.guarded_allocs);
//! ```
//!
//! Obtain a [`Snapshot`] with [`snapshot()`]. Individual counter loads are
//! individually atomic but not globally consistent with each other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    /// Blocks handed out with a guard page.
    pub guarded_allocs: AtomicU64,
    /// Guarded blocks released.
    pub guarded_frees: AtomicU64,
    /// Guarded resizes (each is one allocation plus one release).
    pub resizes: AtomicU64,
    /// Allocations forwarded to the backing allocator while disabled.
    pub passthrough_allocs: AtomicU64,
    /// Releases forwarded to the backing allocator while disabled.
    pub passthrough_frees: AtomicU64,
    /// Calls into the page protection primitive.
    pub protect_calls: AtomicU64,
    /// Requests that came back null: backing allocator refused, or the size
    /// arithmetic overflowed.
    pub exhausted: AtomicU64,
    /// Bytes requested from the backing allocator for guarded blocks.
    pub backing_bytes: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            guarded_allocs: AtomicU64::new(0),
            guarded_frees: AtomicU64::new(0),
            resizes: AtomicU64::new(0),
            passthrough_allocs: AtomicU64::new(0),
            passthrough_frees: AtomicU64::new(0),
            protect_calls: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            backing_bytes: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time copy of the counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub guarded_allocs: u64,
    pub guarded_frees: u64,
    pub resizes: u64,
    pub passthrough_allocs: u64,
    pub passthrough_frees: u64,
    pub protect_calls: u64,
    pub exhausted: u64,
    pub backing_bytes: u64,
}

impl Snapshot {
    /// Guarded blocks currently live, as far as these counters can tell.
    pub fn live_guarded(&self) -> u64 {
        self.guarded_allocs.saturating_sub(self.guarded_frees)
    }
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        guarded_allocs: s.guarded_allocs.load(Ordering::Relaxed),
        guarded_frees: s.guarded_frees.load(Ordering::Relaxed),
        resizes: s.resizes.load(Ordering::Relaxed),
        passthrough_allocs: s.passthrough_allocs.load(Ordering::Relaxed),
        passthrough_frees: s.passthrough_frees.load(Ordering::Relaxed),
        protect_calls: s.protect_calls.load(Ordering::Relaxed),
        exhausted: s.exhausted.load(Ordering::Relaxed),
        backing_bytes: s.backing_bytes.load(Ordering::Relaxed),
    }
}
