//! # Exclusive-access domains
//!
//! Every piece of shared mutable state in the driver core (a class's bank
//! counters, a class's address table, the command ring bookkeeping) lives in
//! exactly one lock. Nothing here ever sleeps: all waiting is spinning, so the
//! primitives are usable from the teardown paths that run in interrupt context.
//!
//! ```text
//!   SpinLock<T>          test-and-test-and-set, closure + guard API
//!   Mutex<T, R>          generic over a raw lock R: RawLock + RawUnlock
//!     ├─ SpinMutex<T>    R = RawSpin   (unfair, cheapest)
//!     └─ TicketMutex<T>  R = RawTicket (FIFO hand-off between callers)
//! ```
//!
//! The command channel uses [`TicketMutex`] so that callers racing for the ring
//! are served in arrival order; the per-class allocators and tables use
//! [`SpinMutex`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod mutex;
mod raw_spin;
mod raw_ticket;
mod spin_lock;

pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;
pub use raw_ticket::RawTicket;
pub use spin_lock::{SpinLock, SpinLockGuard};

/// A mutex backed by [`RawSpin`].
pub type SpinMutex<T> = Mutex<T, RawSpin>;

/// A mutex backed by a ticket lock; waiters acquire in arrival order.
pub type TicketMutex<T> = Mutex<T, RawTicket>;

impl<T> SpinMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

impl<T> TicketMutex<T> {
    #[must_use]
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawTicket::new(), value)
    }
}

/// Acquisition half of a raw lock.
pub trait RawLock {
    /// Spin until the lock is held by the caller.
    fn raw_lock(&self);

    /// Take the lock if it is free right now.
    fn raw_try_lock(&self) -> bool;

    /// Whether some caller currently holds the lock. Advisory only.
    fn raw_is_locked(&self) -> bool;
}

/// Release half of a raw lock.
pub trait RawUnlock {
    /// # Safety
    /// The caller must currently hold the lock.
    unsafe fn raw_unlock(&self);
}
