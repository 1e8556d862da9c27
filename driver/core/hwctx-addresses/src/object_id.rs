use core::fmt;

/// Identifier of a hardware-resident object context.
///
/// The low `shift` bits select the bank, the remaining bits are the index
/// within that bank. `shift` is `log2(bank_count)` of the owning allocator and
/// is not stored in the identifier itself.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ObjectId(u32);

impl ObjectId {
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// `(index << shift) | bank`.
    #[inline]
    #[must_use]
    pub const fn compose(index: u32, bank: u32, shift: u32) -> Self {
        debug_assert!(bank < (1 << shift));
        Self((index << shift) | bank)
    }

    #[inline]
    #[must_use]
    pub const fn bank(self, shift: u32) -> u32 {
        self.0 & ((1 << shift) - 1)
    }

    #[inline]
    #[must_use]
    pub const fn index(self, shift: u32) -> u32 {
        self.0 >> shift
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectId {
    #[inline]
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_and_split() {
        for shift in 0..=3 {
            let banks = 1u32 << shift;
            for bank in 0..banks {
                for index in [0u32, 1, 17, 1000] {
                    let id = ObjectId::compose(index, bank, shift);
                    assert_eq!(id.bank(shift), bank);
                    assert_eq!(id.index(shift), index);
                }
            }
        }
    }

    #[test]
    fn single_bank_is_identity() {
        let id = ObjectId::compose(42, 0, 0);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(id.bank(0), 0);
    }
}
