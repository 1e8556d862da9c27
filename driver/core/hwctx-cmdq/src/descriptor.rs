//! The 32-byte command descriptor shared with the device.

use bitfield_struct::bitfield;
use core::fmt;

/// Size of one descriptor slot in either ring.
pub const DESCRIPTOR_SIZE: usize = 32;

/// Payload words carried inline by a descriptor.
pub const DESCRIPTOR_DATA_WORDS: usize = 6;

/// Command opcode.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Opcode(u16);

impl Opcode {
    pub const QUERY_FIRMWARE_VERSION: Self = Self(0x0001);
    pub const QUERY_HARDWARE_VERSION: Self = Self(0x8000);
    pub const CONFIGURE_BASE_TABLE_ATTRS: Self = Self(0x8506);
    pub const FUNCTION_CLEAR: Self = Self(0x8508);
    pub const POST_MAILBOX: Self = Self(0x7000);
    pub const QUERY_MAILBOX_STATUS: Self = Self(0x7001);

    #[inline]
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opcode({:#06x})", self.0)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Descriptor flag word.
///
/// | Bit | Name            | Meaning                                        |
/// |-----|-----------------|------------------------------------------------|
/// | 0   | `in_valid`      | Payload carries input for the device           |
/// | 1   | `out_valid`     | Device wrote output into the payload           |
/// | 2   | `next`          | Another descriptor of the same command follows |
/// | 3   | `read`          | Device must write its answer back into the slot|
/// | 4   | `no_interrupt`  | Completion is polled, not signalled            |
/// | 5   | `error_interrupt`| Raise an interrupt on failure only            |
///
/// Only the first descriptor's `no_interrupt` bit decides whether
/// [`send`](crate::CommandChannel::send) waits for the device.
#[bitfield(u16)]
#[derive(Eq, PartialEq)]
pub struct DescriptorFlags {
    pub in_valid: bool,
    pub out_valid: bool,
    pub next: bool,
    pub read: bool,
    pub no_interrupt: bool,
    pub error_interrupt: bool,
    #[bits(10)]
    __: u16,
}

/// One command slot.
///
/// ```text
///  0      2      4      6      8                              32
///  ┌──────┬──────┬──────┬──────┬──────────────────────────────┐
///  │opcode│flags │retval│ rsv  │ data[0..6], little endian    │
///  └──────┴──────┴──────┴──────┴──────────────────────────────┘
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CommandDescriptor {
    pub opcode: Opcode,
    pub flags: DescriptorFlags,
    /// Written back by the device; 0 is success.
    pub retval: u16,
    pub data: [u32; DESCRIPTOR_DATA_WORDS],
}

impl CommandDescriptor {
    /// A polled descriptor with input payload, asking for write-back when
    /// `read` is set.
    #[must_use]
    pub const fn new(opcode: Opcode, read: bool) -> Self {
        Self {
            opcode,
            flags: DescriptorFlags::new()
                .with_no_interrupt(true)
                .with_in_valid(true)
                .with_read(read),
            retval: 0,
            data: [0; DESCRIPTOR_DATA_WORDS],
        }
    }

    /// Mark that another descriptor of the same command follows this one.
    #[must_use]
    pub const fn chained(mut self) -> Self {
        self.flags = self.flags.with_next(true);
        self
    }

    /// Completion is signalled by interrupt; `send` does not wait.
    #[must_use]
    pub const fn posted(mut self) -> Self {
        self.flags = self.flags.with_no_interrupt(false);
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_synchronous(&self) -> bool {
        self.flags.no_interrupt()
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut out = [0u8; DESCRIPTOR_SIZE];
        out[0..2].copy_from_slice(&self.opcode.as_u16().to_le_bytes());
        out[2..4].copy_from_slice(&self.flags.into_bits().to_le_bytes());
        out[4..6].copy_from_slice(&self.retval.to_le_bytes());
        for (chunk, word) in out[8..].chunks_exact_mut(4).zip(self.data) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    #[must_use]
    pub fn from_bytes(bytes: &[u8; DESCRIPTOR_SIZE]) -> Self {
        let half = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let mut data = [0u32; DESCRIPTOR_DATA_WORDS];
        for (word, chunk) in data.iter_mut().zip(bytes[8..].chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self {
            opcode: Opcode::new(half(0)),
            flags: DescriptorFlags::from_bits(half(2)),
            retval: half(4),
            data,
        }
    }
}

/// Per-class base-table attributes, one payload word of
/// [`Opcode::CONFIGURE_BASE_TABLE_ATTRS`].
///
/// Page sizes are encoded as `log2(size / 4096)`.
#[bitfield(u32)]
#[derive(Eq, PartialEq)]
pub struct BaseTableAttr {
    /// Pointer chunk size.
    #[bits(4)]
    pub ba_page_shift: u8,
    /// Leaf chunk size.
    #[bits(4)]
    pub buf_page_shift: u8,
    #[bits(2)]
    pub hop_num: u8,
    #[bits(22)]
    __: u32,
}
