use crate::{BankError, ResourceBank};
use alloc::vec::Vec;
use hwctx_addresses::ObjectId;

/// Upper bound on banks per class.
pub const MAX_BANKS: u32 = 8;

/// All banks of one object class.
///
/// Not synchronised on its own; see [`ResourceBankAllocator`](crate::ResourceBankAllocator).
#[derive(Debug, Clone)]
pub struct BankSet {
    shift: u32,
    banks: Vec<ResourceBank>,
}

impl BankSet {
    /// Split `0..object_count` over `bank_count` banks, keeping identifiers
    /// below `reserved` out of circulation.
    ///
    /// # Errors
    /// - [`BankError::BadBankCount`] unless `bank_count` is a power of two in
    ///   `1..=MAX_BANKS`.
    /// - [`BankError::NothingAllocatable`] if `reserved >= object_count`.
    pub fn new(object_count: u32, reserved: u32, bank_count: u32) -> Result<Self, BankError> {
        if !bank_count.is_power_of_two() || bank_count > MAX_BANKS {
            return Err(BankError::BadBankCount(bank_count));
        }
        if reserved >= object_count {
            return Err(BankError::NothingAllocatable {
                object_count,
                reserved,
            });
        }

        let banks = (0..bank_count)
            .map(|b| {
                // Identifiers b, b+n, b+2n, ... below object_count, skipping
                // those below reserved.
                let min = reserved.saturating_sub(b).div_ceil(bank_count);
                let end = object_count.saturating_sub(b).div_ceil(bank_count);
                ResourceBank::new(min, end)
            })
            .collect();

        Ok(Self {
            shift: bank_count.trailing_zeros(),
            banks,
        })
    }

    #[inline]
    #[must_use]
    pub const fn shift(&self) -> u32 {
        self.shift
    }

    #[inline]
    #[must_use]
    pub fn banks(&self) -> &[ResourceBank] {
        &self.banks
    }

    /// Least-loaded permitted bank with room; ties go to the lowest index.
    fn pick(&self, bank_mask: u32) -> Option<usize> {
        self.banks
            .iter()
            .enumerate()
            .filter(|(i, b)| bank_mask & (1 << i) != 0 && !b.is_full())
            .min_by_key(|(i, b)| (b.in_use(), *i))
            .map(|(i, _)| i)
    }

    /// # Errors
    /// [`BankError::Exhausted`] when no permitted bank has a free index.
    pub fn allocate_in(&mut self, bank_mask: u32) -> Result<ObjectId, BankError> {
        let bank = self.pick(bank_mask).ok_or(BankError::Exhausted)?;
        let index = self.banks[bank]
            .take_lowest()
            .ok_or(BankError::Exhausted)?;
        let bank = u32::try_from(bank).map_err(|_| BankError::Exhausted)?;
        Ok(ObjectId::compose(index, bank, self.shift))
    }

    /// # Errors
    /// [`BankError::Exhausted`] when every bank is full.
    pub fn allocate(&mut self) -> Result<ObjectId, BankError> {
        self.allocate_in(u32::MAX)
    }

    pub fn release(&mut self, id: ObjectId) -> bool {
        let bank = id.bank(self.shift) as usize;
        self.banks
            .get_mut(bank)
            .is_some_and(|b| b.put(id.index(self.shift)))
    }

    #[must_use]
    pub fn is_allocated(&self, id: ObjectId) -> bool {
        self.banks
            .get(id.bank(self.shift) as usize)
            .is_some_and(|b| b.is_used(id.index(self.shift)))
    }

    #[must_use]
    pub fn in_use(&self, bank: u32) -> u32 {
        self.banks.get(bank as usize).map_or(0, ResourceBank::in_use)
    }

    #[must_use]
    pub fn total_in_use(&self) -> u32 {
        self.banks.iter().map(ResourceBank::in_use).sum()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.banks.iter().map(ResourceBank::size).sum()
    }
}
