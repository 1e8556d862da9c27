//! # Device Addresses and Object Identifiers
//!
//! Strongly typed wrappers for the handful of numbers that travel between the
//! driver core and the device:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`DeviceAddress`] | A bus address the device can DMA to or from. Never dereferenced by the CPU. |
//! | [`ObjectId`] | A hardware object number, `(intra_bank_index << shift) \| bank_index`. |
//! | [`ObjectClass`] | Which context table an [`ObjectId`] belongs to (CQ, QP, SRQ, MR). |
//!
//! Keeping device addresses distinct from CPU pointers is the point of the
//! exercise: the table code handles both for every chunk, and mixing them up
//! produces a table the device walks into garbage.
//!
//! ```rust
//! # use hwctx_addresses::*;
//! let id = ObjectId::compose(5, 3, 2);
//! assert_eq!(id.as_u32(), (5 << 2) | 3);
//! assert_eq!(id.bank(2), 3);
//! assert_eq!(id.index(2), 5);
//!
//! let base = DeviceAddress::new(0x1_0000_0000);
//! assert!(base.is_aligned(DEVICE_PAGE_SIZE as u64));
//! assert_eq!((base + 0x40).as_u64(), 0x1_0000_0040);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod device_address;
mod object_class;
mod object_id;

pub use device_address::DeviceAddress;
pub use object_class::ObjectClass;
pub use object_id::ObjectId;

/// Granularity of device-visible allocations.
pub const DEVICE_PAGE_SIZE: usize = 4096;

/// `log2(DEVICE_PAGE_SIZE)`.
pub const DEVICE_PAGE_SHIFT: u32 = 12;

/// Width of one pointer entry in an indirection block.
pub const POINTER_SIZE: usize = core::mem::size_of::<u64>();

/// Round `value` up to the next multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Number of device pages needed to hold `bytes`.
#[inline]
#[must_use]
pub const fn pages_for(bytes: usize) -> usize {
    if bytes == 0 {
        return 1;
    }
    bytes.div_ceil(DEVICE_PAGE_SIZE)
}
