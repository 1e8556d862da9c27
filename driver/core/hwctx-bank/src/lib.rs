//! # Resource Bank Allocator
//!
//! Hands out object identifiers for one object class. The identifier space
//! `0..object_count` is split into `bank_count` interleaved banks: the low
//! `log2(bank_count)` bits of an identifier name its bank, the remaining bits
//! its index inside the bank.
//!
//! ```text
//!   id:    0  1  2  3  4  5  6  7  8  9 ...
//!   bank:  0  1  2  3  0  1  2  3  0  1 ...      (bank_count = 4)
//!   index: 0  0  0  0  1  1  1  1  2  2 ...
//! ```
//!
//! Allocation picks the bank with the fewest identifiers in use (ties go to
//! the lowest bank number) and takes the lowest free index in it. Spreading
//! objects evenly over banks is what lets the device hash them onto parallel
//! processing pipelines.
//!
//! The first `reserved` identifiers are never handed out; each bank's index
//! range starts above them.
//!
//! [`BankSet`] is the plain data structure; [`ResourceBankAllocator`] is the
//! per-class owner that puts one exclusive-access domain around it, because
//! "find the least-loaded bank, then take an index from it" is a
//! read-modify-write over every bank's counter.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bank;
mod bank_set;

pub use bank::ResourceBank;
pub use bank_set::{BankSet, MAX_BANKS};

use hwctx_addresses::{ObjectClass, ObjectId};
use hwctx_sync::SpinMutex;
use log::{trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BankError {
    #[error("every bank is fully allocated")]
    Exhausted,
    #[error("bank count {0} must be a power of two between 1 and {MAX_BANKS}")]
    BadBankCount(u32),
    #[error("{reserved} reserved identifiers leave none of {object_count} allocatable")]
    NothingAllocatable { object_count: u32, reserved: u32 },
}

/// Identifier allocator for one object class.
pub struct ResourceBankAllocator {
    class: ObjectClass,
    shift: u32,
    banks: SpinMutex<BankSet>,
}

impl ResourceBankAllocator {
    /// # Errors
    /// See [`BankSet::new`].
    pub fn new(
        class: ObjectClass,
        object_count: u32,
        reserved: u32,
        bank_count: u32,
    ) -> Result<Self, BankError> {
        let set = BankSet::new(object_count, reserved, bank_count)?;
        Ok(Self {
            class,
            shift: set.shift(),
            banks: SpinMutex::new(set),
        })
    }

    #[inline]
    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        self.class
    }

    /// `log2(bank_count)`: how many low identifier bits select the bank.
    #[inline]
    #[must_use]
    pub const fn bank_shift(&self) -> u32 {
        self.shift
    }

    /// Allocate from the least-loaded bank.
    ///
    /// # Errors
    /// [`BankError::Exhausted`] when no bank has a free index. Never blocks
    /// beyond the class lock.
    pub fn allocate(&self) -> Result<ObjectId, BankError> {
        self.allocate_in(u32::MAX)
    }

    /// Allocate from the least-loaded bank among those whose bit is set in
    /// `bank_mask`.
    ///
    /// # Errors
    /// [`BankError::Exhausted`] when none of the permitted banks has room.
    pub fn allocate_in(&self, bank_mask: u32) -> Result<ObjectId, BankError> {
        let id = self.banks.with_lock(|set| set.allocate_in(bank_mask))?;
        trace!("{} id {id} allocated", self.class);
        Ok(id)
    }

    /// Return `id` to its bank. Returns `false` (and does nothing) if `id`
    /// was not live, so a repeated teardown is harmless.
    ///
    /// The caller must already have told the device the context is gone.
    pub fn release(&self, id: ObjectId) -> bool {
        let released = self.banks.with_lock(|set| set.release(id));
        if released {
            trace!("{} id {id} released", self.class);
        } else {
            warn!("{} id {id} released while not allocated", self.class);
        }
        released
    }

    #[must_use]
    pub fn is_allocated(&self, id: ObjectId) -> bool {
        self.banks.with_lock(|set| set.is_allocated(id))
    }

    /// Identifiers in use in `bank`.
    #[must_use]
    pub fn in_use(&self, bank: u32) -> u32 {
        self.banks.with_lock(|set| set.in_use(bank))
    }

    #[must_use]
    pub fn total_in_use(&self) -> u32 {
        self.banks.with_lock(|set| set.total_in_use())
    }

    /// Allocatable identifiers across all banks.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.banks.with_lock(|set| set.capacity())
    }

    #[must_use]
    pub fn bank_count(&self) -> u32 {
        1 << self.shift
    }

    /// Copy of the per-bank use counters, indexed by bank.
    #[must_use]
    pub fn load(&self) -> alloc::vec::Vec<u32> {
        self.banks
            .with_lock(|set| set.banks().iter().map(ResourceBank::in_use).collect())
    }
}
