/// Increment a stats counter by 1.
///
/// Compiles to nothing when the `stats` feature is disabled.
macro_rules! stat_inc {
    ($counter:ident) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add(1, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Add a value to a stats counter.
///
/// Compiles to nothing (including the value expression) when the `stats`
/// feature is disabled.
macro_rules! stat_add {
    ($counter:ident, $val:expr) => {
        #[cfg(feature = "stats")]
        {
            $crate::stats::STATS
                .$counter
                .fetch_add($val as u64, ::core::sync::atomic::Ordering::Relaxed);
        }
    };
}

/// Emit a `log` record under the `pagefence` target.
///
/// The record is dropped when the current thread is already inside a log
/// call, so a logger that allocates through this allocator cannot recurse.
macro_rules! fence_log {
    ($lvl:ident, $($arg:tt)+) => {
        if let Some(_guard) = $crate::macros::LogGuard::enter() {
            ::log::$lvl!(target: "pagefence", $($arg)+);
        }
    };
}

/// Held for the duration of one log call.
pub(crate) struct LogGuard(());

impl LogGuard {
    #[inline]
    pub(crate) fn enter() -> Option<LogGuard> {
        if log::max_level() == log::LevelFilter::Off {
            return None;
        }
        if reentry::try_acquire() {
            Some(LogGuard(()))
        } else {
            None
        }
    }
}

impl Drop for LogGuard {
    #[inline]
    fn drop(&mut self) {
        reentry::release();
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(test, feature = "std"))] {
        mod reentry {
            use core::cell::Cell;

            std::thread_local! {
                static IN_LOG: Cell<bool> = const { Cell::new(false) };
            }

            pub(super) fn try_acquire() -> bool {
                // During thread teardown the slot may be gone; stay quiet.
                IN_LOG.try_with(|flag| !flag.replace(true)).unwrap_or(false)
            }

            pub(super) fn release() {
                let _ = IN_LOG.try_with(|flag| flag.set(false));
            }
        }
    } else {
        mod reentry {
            use core::sync::atomic::{AtomicBool, Ordering};

            // Without thread-locals a single flag covers every thread: a log
            // call racing another thread's log call is dropped.
            static IN_LOG: AtomicBool = AtomicBool::new(false);

            pub(super) fn try_acquire() -> bool {
                IN_LOG
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
            }

            pub(super) fn release() {
                IN_LOG.store(false, Ordering::Release);
            }
        }
    }
}
