use crate::{RawLock, RawUnlock};
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

/// FIFO ticket lock word.
///
/// `next` is the ticket handed to the next arriving caller, `serving` is the
/// ticket currently allowed in. The lock is free when both are equal.
pub struct RawTicket {
    next: AtomicUsize,
    serving: AtomicUsize,
}

impl Default for RawTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTicket {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicUsize::new(0),
            serving: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        while self.serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
    }

    #[inline]
    pub fn try_lock(&self) -> bool {
        let serving = self.serving.load(Ordering::Relaxed);
        self.next
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Number of callers holding or waiting for the lock.
    #[inline]
    pub fn queue_len(&self) -> usize {
        self.next
            .load(Ordering::Relaxed)
            .wrapping_sub(self.serving.load(Ordering::Relaxed))
    }

    /// # Safety
    /// The caller must hold the lock.
    #[inline]
    pub unsafe fn unlock(&self) {
        let current = self.serving.load(Ordering::Relaxed);
        self.serving
            .store(current.wrapping_add(1), Ordering::Release);
    }
}

impl RawLock for RawTicket {
    fn raw_lock(&self) {
        self.lock();
    }

    fn raw_try_lock(&self) -> bool {
        self.try_lock()
    }

    fn raw_is_locked(&self) -> bool {
        self.queue_len() != 0
    }
}

impl RawUnlock for RawTicket {
    unsafe fn raw_unlock(&self) {
        unsafe { self.unlock() }
    }
}
