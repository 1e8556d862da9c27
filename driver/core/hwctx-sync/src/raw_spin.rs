use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Upper bound on `spin_loop` hints between two acquisition attempts.
const MAX_BACKOFF: u32 = 64;

/// Unfair lock word for the short critical sections of bank counters and
/// table bookkeeping.
///
/// Contended callers watch the word with plain loads and back off
/// exponentially, so a waiting core does not keep stealing the cache line
/// from the holder.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn lock(&self) {
        let mut backoff = 1;
        while !self.try_lock() {
            while self.held.load(Ordering::Relaxed) {
                for _ in 0..backoff {
                    spin_loop();
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        debug_assert!(self.is_held(), "unlock of a free spin lock");
        self.held.store(false, Ordering::Release);
    }
}

impl RawLock for RawSpin {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    fn raw_is_locked(&self) -> bool {
        self.is_held()
    }
}

impl RawUnlock for RawSpin {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
