use alloc::vec;
use alloc::vec::Vec;
use core::ops::Range;

const WORD_BITS: u32 = u64::BITS;

/// One partition of a class's identifier space.
///
/// Indices `min..end` are owned by this bank; bit `i - min` of `used` is set
/// while index `i` is allocated.
#[derive(Debug, Clone)]
pub struct ResourceBank {
    min: u32,
    end: u32,
    in_use: u32,
    used: Vec<u64>,
}

impl ResourceBank {
    pub(crate) fn new(min: u32, end: u32) -> Self {
        let size = end.saturating_sub(min);
        Self {
            min,
            end: min + size,
            in_use: 0,
            used: vec![0; size.div_ceil(WORD_BITS) as usize],
        }
    }

    /// Intra-bank indices owned by this bank.
    #[inline]
    #[must_use]
    pub const fn index_range(&self) -> Range<u32> {
        self.min..self.end
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.end - self.min
    }

    #[inline]
    #[must_use]
    pub const fn in_use(&self) -> u32 {
        self.in_use
    }

    #[inline]
    #[must_use]
    pub const fn free(&self) -> u32 {
        self.size() - self.in_use
    }

    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.in_use == self.size()
    }

    #[inline]
    const fn slot(&self, index: u32) -> Option<(usize, u64)> {
        if index < self.min || index >= self.end {
            return None;
        }
        let bit = index - self.min;
        Some(((bit / WORD_BITS) as usize, 1 << (bit % WORD_BITS)))
    }

    #[must_use]
    pub fn is_used(&self, index: u32) -> bool {
        self.slot(index)
            .is_some_and(|(word, mask)| self.used[word] & mask != 0)
    }

    /// Take the lowest free index.
    pub(crate) fn take_lowest(&mut self) -> Option<u32> {
        let size = self.size();
        let (word_idx, word) = self
            .used
            .iter_mut()
            .enumerate()
            .find(|(_, w)| **w != u64::MAX)?;
        let bit = (!*word).trailing_zeros();
        let local = u32::try_from(word_idx).ok()? * WORD_BITS + bit;
        if local >= size {
            return None;
        }
        *word |= 1 << bit;
        self.in_use += 1;
        Some(self.min + local)
    }

    /// Clear `index`; `false` if it was not allocated.
    pub(crate) fn put(&mut self, index: u32) -> bool {
        let Some((word, mask)) = self.slot(index) else {
            return false;
        };
        if self.used[word] & mask == 0 {
            return false;
        }
        self.used[word] &= !mask;
        self.in_use -= 1;
        true
    }

    /// Count of set bits; equals `in_use` while the bank is consistent.
    #[must_use]
    pub fn counted_in_use(&self) -> u32 {
        self.used.iter().map(|w| w.count_ones()).sum()
    }
}
